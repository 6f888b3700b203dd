//! # kwcache-shared
//!
//! Shared result types, error envelopes, and request plumbing for the kwcache
//! workspace.
//!
//! - Error envelope and `Result` alias used at every crate boundary
//! - Secret wrappers and key-based redaction
//! - Request context with correlation ids and cooperative cancellation
//! - Retry with exponential backoff for remote collaborators
//!
//! This crate has no workspace dependencies.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod context;
pub mod errors;
pub mod redaction;
pub mod result;
pub mod retry;

pub use context::{CancellationToken, CorrelationId, RequestContext};
pub use errors::{
    ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata, REDACTED_VALUE,
};
pub use redaction::{REDACTED, SecretString, is_secret_key};
pub use result::Result;
pub use retry::{RetryPolicy, retry_async, retry_async_with_observer};
