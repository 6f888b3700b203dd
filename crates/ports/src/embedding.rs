//! Embedding value types and the embedding generation contract.

use crate::BoxFuture;
use kwcache_shared::{RequestContext, Result};
use std::fmt;
use std::sync::Arc;

/// A dense `f32` embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    vector: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Build an embedding vector from a shared slice.
    #[must_use]
    pub const fn new(vector: Arc<[f32]>) -> Self {
        Self { vector }
    }

    /// Build an embedding vector from an owned vector.
    #[must_use]
    pub fn from_vec(vector: Vec<f32>) -> Self {
        Self::new(Arc::from(vector))
    }

    /// Borrow the vector as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.vector
    }

    /// Number of components.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Returns true when the bit patterns of every component match.
    ///
    /// Unlike `==`, this treats identical NaN payloads as equal.
    #[must_use]
    pub fn bits_eq(&self, other: &Self) -> bool {
        self.dimension() == other.dimension()
            && self
                .vector
                .iter()
                .zip(other.vector.iter())
                .all(|(left, right)| left.to_bits() == right.to_bits())
    }

    /// Copy the components into an owned vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(vector: Vec<f32>) -> Self {
        Self::from_vec(vector)
    }
}

/// Numeric element type of an [`EmbeddingArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit IEEE-754 float.
    Float32,
    /// 64-bit IEEE-754 float.
    Float64,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
}

impl ElementType {
    /// Stable lowercase name (`float32`, `float64`, `int32`, `int64`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
        }
    }

    /// Parse a stable name, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "float32" | "f32" => Some(Self::Float32),
            "float64" | "f64" => Some(Self::Float64),
            "int32" | "i32" => Some(Self::Int32),
            "int64" | "i64" => Some(Self::Int64),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A candidate embedding tagged with its element type.
///
/// Only `Float32` arrays are storable; other element types exist so callers
/// can hand over whatever their producer emitted and get a typed rejection
/// instead of a silent conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingArray {
    /// `float32` components.
    Float32(Vec<f32>),
    /// `float64` components.
    Float64(Vec<f64>),
    /// `int32` components.
    Int32(Vec<i32>),
    /// `int64` components.
    Int64(Vec<i64>),
}

impl EmbeddingArray {
    /// Element type of this array.
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::Float32(_) => ElementType::Float32,
            Self::Float64(_) => ElementType::Float64,
            Self::Int32(_) => ElementType::Int32,
            Self::Int64(_) => ElementType::Int64,
        }
    }

    /// Number of components.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Float32(values) => values.len(),
            Self::Float64(values) => values.len(),
            Self::Int32(values) => values.len(),
            Self::Int64(values) => values.len(),
        }
    }

    /// Returns true when the array has no components.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the components when the element type is `float32`.
    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::Float32(values) => Some(values),
            _ => None,
        }
    }
}

impl From<Vec<f32>> for EmbeddingArray {
    fn from(values: Vec<f32>) -> Self {
        Self::Float32(values)
    }
}

impl From<Vec<f64>> for EmbeddingArray {
    fn from(values: Vec<f64>) -> Self {
        Self::Float64(values)
    }
}

impl From<Vec<i32>> for EmbeddingArray {
    fn from(values: Vec<i32>) -> Self {
        Self::Int32(values)
    }
}

impl From<Vec<i64>> for EmbeddingArray {
    fn from(values: Vec<i64>) -> Self {
        Self::Int64(values)
    }
}

impl From<&EmbeddingVector> for EmbeddingArray {
    fn from(vector: &EmbeddingVector) -> Self {
        Self::Float32(vector.to_vec())
    }
}

/// Descriptor of the remote embedding provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingProviderInfo {
    /// Human-readable provider name.
    pub name: Box<str>,
    /// Model the provider was configured with.
    pub model: Box<str>,
}

/// Owned request to embed a batch of texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedBatchRequest {
    /// Texts to embed, in order.
    pub texts: Vec<Box<str>>,
}

impl From<Vec<Box<str>>> for EmbedBatchRequest {
    fn from(texts: Vec<Box<str>>) -> Self {
        Self { texts }
    }
}

impl From<Vec<String>> for EmbedBatchRequest {
    fn from(texts: Vec<String>) -> Self {
        Self {
            texts: texts.into_iter().map(String::into_boxed_str).collect(),
        }
    }
}

/// Boundary contract for embedding generation.
pub trait EmbeddingPort: Send + Sync {
    /// Provider info for this implementation.
    fn provider(&self) -> &EmbeddingProviderInfo;

    /// Embed a batch of texts. The result has one vector per input, in order.
    fn embed_batch(
        &self,
        ctx: &RequestContext,
        request: EmbedBatchRequest,
    ) -> BoxFuture<'_, Result<Vec<EmbeddingVector>>>;
}
