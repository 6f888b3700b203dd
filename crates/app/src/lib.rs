//! # kwcache-app
//!
//! Application use cases built on the kwcache ports.
//! This crate depends on `ports` and `shared`.

pub mod resolve_embeddings;

pub use resolve_embeddings::{
    EmbeddingSource, ResolveEmbeddingsDeps, ResolveEmbeddingsInput, ResolveEmbeddingsOutput,
    ResolvedEmbedding, resolve_embeddings,
};
