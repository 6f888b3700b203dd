//! Keyword embedding store contract.

use crate::{EmbeddingArray, EmbeddingVector};
use kwcache_shared::Result;
use std::collections::BTreeMap;

/// A keyword and the embedding proposed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordEntry {
    /// Cache key.
    pub keyword: String,
    /// Candidate embedding.
    pub embedding: EmbeddingArray,
}

impl KeywordEntry {
    /// Build an entry from anything convertible into an [`EmbeddingArray`].
    pub fn new(keyword: impl Into<String>, embedding: impl Into<EmbeddingArray>) -> Self {
        Self {
            keyword: keyword.into(),
            embedding: embedding.into(),
        }
    }
}

/// Outcome of a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    /// Entries written by this batch.
    pub inserted: usize,
    /// Entries ignored because the keyword was already stored
    /// (or repeated earlier in the same batch).
    pub skipped: usize,
}

impl InsertSummary {
    /// Total entries considered.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.inserted + self.skipped
    }
}

/// Boundary contract for a persistent keyword to embedding store.
///
/// Operations are blocking. Reads return only keywords that are present;
/// writes are insert-if-absent and all-or-nothing per batch.
pub trait KeywordStorePort: Send {
    /// Fetch stored embeddings for the given keywords.
    fn get_many(&self, keywords: &[String]) -> Result<BTreeMap<String, EmbeddingVector>>;

    /// Insert entries whose keyword is not stored yet.
    fn add_many(&mut self, entries: &[KeywordEntry]) -> Result<InsertSummary>;

    /// Number of stored entries.
    fn count(&self) -> Result<u64>;

    /// Release the underlying storage. Later calls fail.
    fn close(&mut self) -> Result<()>;
}
