//! OpenAI-compatible embedding adapter.

use crate::openai_http::{OpenAiHttp, OpenAiHttpConfig};
use kwcache_config::DEFAULT_EMBEDDING_MODEL;
use kwcache_ports::{
    BoxFuture, EmbedBatchRequest, EmbeddingPort, EmbeddingProviderInfo, EmbeddingVector,
};
use kwcache_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde::{Deserialize, Serialize};

const OPERATION: &str = "openai_embedding.embed_batch";

/// OpenAI-compatible embedding adapter configuration.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    /// Transport settings.
    pub http: OpenAiHttpConfig,
    /// Embedding model (defaults to `gemini-embedding-exp-03-07`).
    pub model: Option<Box<str>>,
}

/// Embedding adapter that calls `POST {base}/embeddings`.
#[derive(Debug)]
pub struct OpenAiEmbedding {
    provider: EmbeddingProviderInfo,
    http: OpenAiHttp,
    model: Box<str>,
}

impl OpenAiEmbedding {
    /// Create a new embedding adapter.
    pub fn new(config: &OpenAiEmbeddingConfig) -> Result<Self> {
        let model = match config.model.as_deref().map(str::trim) {
            Some("") => {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "embedding model must be non-empty",
                ));
            },
            Some(model) => model,
            None => DEFAULT_EMBEDDING_MODEL,
        };
        let http = OpenAiHttp::new(&config.http, "embedding")?;
        Ok(Self {
            provider: EmbeddingProviderInfo {
                name: "openai-compatible".into(),
                model: model.into(),
            },
            http,
            model: model.into(),
        })
    }

    async fn embed_many(
        &self,
        ctx: &RequestContext,
        texts: Vec<Box<str>>,
    ) -> Result<Vec<EmbeddingVector>> {
        ctx.ensure_not_cancelled(OPERATION)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected_count = texts.len();
        let request = EmbeddingRequest {
            input: texts,
            model: self.model.clone(),
        };
        let response: EmbeddingResponse = self
            .http
            .post_json(ctx, "/embeddings", &request, OPERATION)
            .await?;
        tracing::debug!(
            model = %self.model,
            count = expected_count,
            "embedded batch"
        );
        map_embeddings(response, expected_count)
    }
}

impl EmbeddingPort for OpenAiEmbedding {
    fn provider(&self) -> &EmbeddingProviderInfo {
        &self.provider
    }

    fn embed_batch(
        &self,
        ctx: &RequestContext,
        request: EmbedBatchRequest,
    ) -> BoxFuture<'_, Result<Vec<EmbeddingVector>>> {
        let ctx = ctx.clone();
        Box::pin(async move { self.embed_many(&ctx, request.texts).await })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: Vec<Box<str>>,
    model: Box<str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

fn invalid_response(message: &str) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("embedding", "invalid_response"),
        message,
        ErrorClass::NonRetriable,
    )
}

/// Order response vectors by `index`, falling back to response order when the
/// provider omits indices.
fn map_embeddings(
    response: EmbeddingResponse,
    expected_count: usize,
) -> Result<Vec<EmbeddingVector>> {
    if response.data.len() != expected_count {
        return Err(invalid_response(&format!(
            "embedding response count mismatch (expected {expected_count}, got {})",
            response.data.len()
        )));
    }

    let mut slots: Vec<Option<EmbeddingVector>> = vec![None; expected_count];
    for (position, datum) in response.data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| invalid_response("embedding response index out of range"))?;
        if slot.is_some() {
            return Err(invalid_response("embedding response index duplicated"));
        }
        *slot = Some(EmbeddingVector::from_vec(datum.embedding));
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| invalid_response("embedding response missing index")))
        .collect()
}
