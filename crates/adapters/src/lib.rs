//! # kwcache-adapters
//!
//! Adapter implementations for the kwcache ports: the SQLite keyword store,
//! OpenAI-compatible embedding and completion clients, and JSON logging.
//! This crate depends on `ports`, `shared`, and `config`.

pub mod completion;
pub mod embedding;
pub mod log_sink;
pub mod logger;
pub mod openai_http;
pub mod store;
