//! Persistent keyword to embedding cache.
//!
//! A single SQLite table maps each keyword to a little-endian `f32` blob.
//! Writes are insert-if-absent and validated before any row is touched.

mod codec;
mod error;
mod sqlite;

pub use codec::{BYTES_PER_COMPONENT, decode_embedding, encode_embedding};
pub use error::{CorruptReason, InvalidEmbeddingReason, StoreError};
pub use sqlite::{
    DEFAULT_BUSY_TIMEOUT, KeywordEmbeddingStore, MAX_PARAMS_PER_QUERY, SCHEMA_VERSION, StoreOptions,
    TABLE_NAME,
};
