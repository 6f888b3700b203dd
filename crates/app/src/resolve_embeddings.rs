//! Cache-aside embedding resolution.
//!
//! Stored vectors are served from the keyword store; only misses reach the
//! embedding provider, in a single batch, and are written back before the
//! call returns.

use kwcache_ports::{
    EmbeddingArray, EmbeddingPort, EmbeddingVector, InsertSummary, KeywordEntry,
    KeywordStorePort, LogFields, LoggerPort, log_fields,
};
use kwcache_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Input payload for embedding resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveEmbeddingsInput {
    /// Keywords to resolve. Duplicates are collapsed; first occurrence wins
    /// the output position.
    pub keywords: Vec<String>,
}

/// Dependencies required by embedding resolution.
#[derive(Clone)]
pub struct ResolveEmbeddingsDeps {
    /// Embedding adapter used for cache misses.
    pub embedding: Arc<dyn EmbeddingPort>,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
}

/// Where a resolved vector came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingSource {
    /// Already in the store.
    Cached,
    /// Computed by the provider during this call.
    Computed,
}

impl EmbeddingSource {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Computed => "computed",
        }
    }
}

/// One resolved keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEmbedding {
    /// Keyword.
    pub keyword: String,
    /// Vector as persisted in the store.
    pub vector: EmbeddingVector,
    /// Origin of the vector.
    pub source: EmbeddingSource,
}

/// Result of embedding resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveEmbeddingsOutput {
    /// Resolved keywords in first-occurrence input order.
    pub resolved: Vec<ResolvedEmbedding>,
    /// Outcome of writing computed vectors back.
    pub insert: InsertSummary,
}

impl ResolveEmbeddingsOutput {
    /// Number of keywords served from the store.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.resolved
            .iter()
            .filter(|entry| entry.source == EmbeddingSource::Cached)
            .count()
    }

    /// Number of keywords sent to the provider.
    #[must_use]
    pub fn computed(&self) -> usize {
        self.resolved.len() - self.hits()
    }

    /// Collapse into a keyword to vector map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, EmbeddingVector> {
        self.resolved
            .into_iter()
            .map(|entry| (entry.keyword, entry.vector))
            .collect()
    }
}

/// Resolve embeddings for every keyword, computing and caching misses.
pub async fn resolve_embeddings(
    ctx: &RequestContext,
    deps: &ResolveEmbeddingsDeps,
    store: &mut dyn KeywordStorePort,
    input: ResolveEmbeddingsInput,
) -> Result<ResolveEmbeddingsOutput> {
    let started_at = Instant::now();
    let result = run_resolve(ctx, deps, store, &input).await;

    if let Some(logger) = deps.logger.as_ref() {
        match &result {
            Ok(output) => logger.info(
                "app.resolve.completed",
                "Embedding resolution completed",
                Some(log_fields([
                    ("keywords", Value::from(output.resolved.len())),
                    ("hits", Value::from(output.hits())),
                    ("computed", Value::from(output.computed())),
                    ("inserted", Value::from(output.insert.inserted)),
                    ("durationMs", Value::from(duration_ms(started_at))),
                ])),
            ),
            Err(error) if error.is_cancelled() => logger.info(
                "app.resolve.aborted",
                "Embedding resolution aborted",
                Some(error_fields(&input, started_at, error)),
            ),
            Err(error) => logger.error(
                "app.resolve.failed",
                "Embedding resolution failed",
                Some(error_fields(&input, started_at, error)),
                serde_json::to_value(error).ok(),
            ),
        }
    }

    result
}

async fn run_resolve(
    ctx: &RequestContext,
    deps: &ResolveEmbeddingsDeps,
    store: &mut dyn KeywordStorePort,
    input: &ResolveEmbeddingsInput,
) -> Result<ResolveEmbeddingsOutput> {
    ctx.ensure_not_cancelled("resolve_embeddings.start")?;

    let keywords = unique_in_order(&input.keywords)?;
    if keywords.is_empty() {
        return Ok(ResolveEmbeddingsOutput {
            resolved: Vec::new(),
            insert: InsertSummary::default(),
        });
    }

    let mut cached = store.get_many(&keywords)?;
    let misses: Vec<String> = keywords
        .iter()
        .filter(|keyword| !cached.contains_key(*keyword))
        .cloned()
        .collect();

    let mut computed = BTreeMap::new();
    let mut insert = InsertSummary::default();
    if !misses.is_empty() {
        ctx.ensure_not_cancelled("resolve_embeddings.embed")?;
        let vectors = deps
            .embedding
            .embed_batch(ctx, misses.clone().into())
            .await?;
        if vectors.len() != misses.len() {
            return Err(ErrorEnvelope::unexpected(
                ErrorCode::new("app", "embedding_count_mismatch"),
                format!(
                    "embedding provider returned {} vectors for {} keywords",
                    vectors.len(),
                    misses.len()
                ),
                ErrorClass::NonRetriable,
            ));
        }

        let entries: Vec<KeywordEntry> = misses
            .iter()
            .zip(&vectors)
            .map(|(keyword, vector)| {
                KeywordEntry::new(keyword.clone(), EmbeddingArray::from(vector))
            })
            .collect();
        insert = store.add_many(&entries)?;
        computed = misses.iter().cloned().zip(vectors).collect();

        // Another writer stored some of these first; serve what was persisted.
        if insert.skipped > 0 {
            for (keyword, persisted) in store.get_many(&misses)? {
                let superseded = computed
                    .get(&keyword)
                    .is_some_and(|ours: &EmbeddingVector| !ours.bits_eq(&persisted));
                if superseded {
                    computed.remove(&keyword);
                    cached.insert(keyword, persisted);
                }
            }
        }
    }

    let resolved = keywords
        .into_iter()
        .filter_map(|keyword| {
            if let Some(vector) = cached.remove(&keyword) {
                return Some(ResolvedEmbedding {
                    keyword,
                    vector,
                    source: EmbeddingSource::Cached,
                });
            }
            computed.remove(&keyword).map(|vector| ResolvedEmbedding {
                keyword,
                vector,
                source: EmbeddingSource::Computed,
            })
        })
        .collect();

    Ok(ResolveEmbeddingsOutput { resolved, insert })
}

fn unique_in_order(keywords: &[String]) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut unique = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        if keyword.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "keywords must be non-empty",
            ));
        }
        if seen.insert(keyword.as_str()) {
            unique.push(keyword.clone());
        }
    }
    Ok(unique)
}

fn error_fields(
    input: &ResolveEmbeddingsInput,
    started_at: Instant,
    error: &ErrorEnvelope,
) -> LogFields {
    log_fields([
        ("keywords", Value::from(input.keywords.len())),
        ("durationMs", Value::from(duration_ms(started_at))),
        ("errorCode", Value::from(error.code.to_string())),
    ])
}

fn duration_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}
