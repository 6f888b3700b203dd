//! Embedding adapter implementations.

pub mod openai;
