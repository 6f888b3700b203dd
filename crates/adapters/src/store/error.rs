//! Keyword store error types.

use kwcache_ports::ElementType;
use kwcache_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a candidate entry was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidEmbeddingReason {
    /// The keyword is the empty string.
    EmptyKeyword,
    /// The embedding has no components.
    EmptyVector,
    /// The embedding is not `float32`.
    WrongElementType(ElementType),
}

impl fmt::Display for InvalidEmbeddingReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyKeyword => formatter.write_str("keyword must be non-empty"),
            Self::EmptyVector => formatter.write_str("embedding must have at least one component"),
            Self::WrongElementType(found) => {
                write!(formatter, "embedding must be float32, got {found}")
            },
        }
    }
}

/// Why a stored row could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// Blob length is not a multiple of four bytes.
    Length(usize),
    /// The embedding column is NULL.
    Null,
    /// The embedding column holds a non-blob SQLite value.
    NotBlob(&'static str),
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length(len) => write!(formatter, "blob of {len} bytes is not a float32 array"),
            Self::Null => formatter.write_str("embedding is NULL"),
            Self::NotBlob(found) => write!(formatter, "embedding is stored as {found}"),
        }
    }
}

/// Errors raised by [`crate::store::KeywordEmbeddingStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// A candidate entry failed validation; nothing was written.
    #[error("invalid embedding for keyword {keyword:?}: {reason}")]
    InvalidEmbedding {
        /// Keyword of the offending entry.
        keyword: String,
        /// Validation failure.
        reason: InvalidEmbeddingReason,
    },

    /// The storage engine reported a failure.
    #[error("{operation} failed: {source}")]
    Storage {
        /// Store operation that failed.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// The filesystem refused to host the store.
    #[error("{operation} failed for {}: {source}", path.display())]
    Io {
        /// Store operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stored row does not decode to an embedding.
    #[error("corrupt entry for keyword {keyword:?}: {reason}")]
    CorruptEntry {
        /// Keyword of the corrupt row.
        keyword: String,
        /// Decoding failure.
        reason: CorruptReason,
    },

    /// The handle was used after `close`.
    #[error("store is closed (attempted {operation})")]
    UseAfterClose {
        /// Store operation that was attempted.
        operation: &'static str,
    },

    /// The file was written by a newer schema.
    #[error("unsupported store schema version {found} (supported up to {supported})")]
    UnsupportedSchema {
        /// Version found in the file.
        found: i64,
        /// Highest version this build understands.
        supported: i64,
    },
}

impl StoreError {
    /// Stable error code within the `store` namespace.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEmbedding { .. } => "invalid_embedding",
            Self::Storage { .. } => "storage",
            Self::Io { .. } => "io",
            Self::CorruptEntry { .. } => "corrupt_entry",
            Self::UseAfterClose { .. } => "closed",
            Self::UnsupportedSchema { .. } => "unsupported_schema",
        }
    }

    /// Returns true for failures of the storage medium rather than the caller.
    #[must_use]
    pub const fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::Io { .. }
                | Self::CorruptEntry { .. }
                | Self::UnsupportedSchema { .. }
        )
    }

    /// Returns true when SQLite gave up waiting for a lock.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        let Self::Storage { source, .. } = self else {
            return false;
        };
        matches!(
            source.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }

    pub(crate) fn storage(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Storage { operation, source }
    }
}

impl From<StoreError> for ErrorEnvelope {
    fn from(error: StoreError) -> Self {
        let code = ErrorCode::new("store", error.error_code());
        let message = error.to_string();
        let envelope = match &error {
            StoreError::InvalidEmbedding { .. } => Self::expected(code, message),
            StoreError::UseAfterClose { .. } | StoreError::CorruptEntry { .. } => {
                Self::invariant(code, message)
            },
            StoreError::Storage { .. } => {
                let class = if error.is_busy() {
                    ErrorClass::Retriable
                } else {
                    ErrorClass::NonRetriable
                };
                Self::unexpected(code, message, class)
            },
            StoreError::Io { .. } | StoreError::UnsupportedSchema { .. } => {
                Self::unexpected(code, message, ErrorClass::NonRetriable)
            },
        };

        match error {
            StoreError::InvalidEmbedding { keyword, .. } | StoreError::CorruptEntry { keyword, .. } => {
                envelope.with_metadata("keyword", keyword)
            },
            StoreError::Storage { operation, .. } | StoreError::UseAfterClose { operation } => {
                envelope.with_metadata("operation", operation)
            },
            StoreError::Io {
                operation, path, ..
            } => envelope
                .with_metadata("operation", operation)
                .with_metadata("path", path.display().to_string()),
            StoreError::UnsupportedSchema { found, .. } => {
                envelope.with_metadata("schemaVersion", found.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwcache_shared::ErrorKind;

    #[test]
    fn invalid_embedding_maps_to_expected_error() {
        let envelope = ErrorEnvelope::from(StoreError::InvalidEmbedding {
            keyword: "apple".to_string(),
            reason: InvalidEmbeddingReason::WrongElementType(ElementType::Float64),
        });
        assert_eq!(envelope.kind, ErrorKind::Expected);
        assert_eq!(envelope.code, ErrorCode::new("store", "invalid_embedding"));
        assert_eq!(
            envelope.metadata.get("keyword").map(String::as_str),
            Some("apple")
        );
        assert!(envelope.message.contains("float64"));
    }

    #[test]
    fn closed_store_is_an_invariant_violation() {
        let envelope = ErrorEnvelope::from(StoreError::UseAfterClose { operation: "get" });
        assert_eq!(envelope.kind, ErrorKind::Invariant);
        assert_eq!(envelope.code, ErrorCode::new("store", "closed"));
        assert_eq!(
            envelope.metadata.get("operation").map(String::as_str),
            Some("get")
        );
    }

    #[test]
    fn busy_database_is_retriable() {
        let busy = StoreError::Storage {
            operation: "add",
            source: rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            ),
        };
        assert!(busy.is_busy());
        assert!(busy.is_storage_fault());
        assert_eq!(ErrorEnvelope::from(busy).class, ErrorClass::Retriable);

        let other = StoreError::Storage {
            operation: "add",
            source: rusqlite::Error::InvalidQuery,
        };
        assert!(!other.is_busy());
        assert_eq!(ErrorEnvelope::from(other).class, ErrorClass::NonRetriable);
    }

    #[test]
    fn corrupt_entry_names_the_keyword() {
        let error = StoreError::CorruptEntry {
            keyword: "pear".to_string(),
            reason: CorruptReason::Length(7),
        };
        assert!(error.is_storage_fault());
        assert_eq!(
            error.to_string(),
            "corrupt entry for keyword \"pear\": blob of 7 bytes is not a float32 array"
        );
    }
}
