//! Binary layout of stored embeddings.
//!
//! A blob is a flat sequence of little-endian IEEE-754 `f32` values with no
//! header. The dimension is `blob.len() / 4`.

/// Bytes per encoded component.
pub const BYTES_PER_COMPONENT: usize = std::mem::size_of::<f32>();

/// Encode components into the stored blob layout.
#[must_use]
pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * BYTES_PER_COMPONENT);
    for value in values {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a stored blob.
///
/// Returns `None` when the length is not a multiple of four bytes.
#[must_use]
pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    let chunks = blob.chunks_exact(BYTES_PER_COMPONENT);
    if !chunks.remainder().is_empty() {
        return None;
    }
    Some(
        chunks
            .map(|chunk| {
                let mut bytes = [0u8; BYTES_PER_COMPONENT];
                bytes.copy_from_slice(chunk);
                f32::from_le_bytes(bytes)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn layout_is_little_endian_without_header() {
        let blob = encode_embedding(&[1.0, -2.5]);
        assert_eq!(blob, vec![0x00, 0x00, 0x80, 0x3f, 0x00, 0x00, 0x20, 0xc0]);
    }

    #[test]
    fn misaligned_blobs_are_rejected() {
        assert_eq!(decode_embedding(&[0x00, 0x00, 0x80]), None);
        assert_eq!(decode_embedding(&[0u8; 9]), None);
    }

    #[test]
    fn empty_blob_decodes_to_empty_vector() {
        assert_eq!(decode_embedding(&[]), Some(Vec::new()));
    }

    proptest! {
        #[test]
        fn decode_restores_exact_bits(bits in proptest::collection::vec(any::<u32>(), 0..64)) {
            let values: Vec<f32> = bits.iter().copied().map(f32::from_bits).collect();
            let blob = encode_embedding(&values);
            prop_assert_eq!(blob.len(), values.len() * BYTES_PER_COMPONENT);

            let decoded = decode_embedding(&blob).unwrap_or_default();
            let decoded_bits: Vec<u32> = decoded.iter().map(|value| value.to_bits()).collect();
            prop_assert_eq!(decoded_bits, bits);
        }
    }
}
