//! Shared HTTP plumbing for OpenAI-compatible endpoints.

use kwcache_config::LlmConfig;
use kwcache_shared::{
    ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result, RetryPolicy, SecretString,
    retry_async_with_observer,
};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings shared by the embedding and completion clients.
#[derive(Debug, Clone)]
pub struct OpenAiHttpConfig {
    /// Bearer token.
    pub api_key: SecretString,
    /// Base URL override (defaults to [`DEFAULT_BASE_URL`]).
    pub base_url: Option<Box<str>>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for retriable failures.
    pub retry: RetryPolicy,
}

impl OpenAiHttpConfig {
    /// Build from the validated LLM config plus the API key.
    #[must_use]
    pub fn from_llm_config(api_key: SecretString, config: &LlmConfig) -> Self {
        Self {
            api_key,
            base_url: config.base_url.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            retry: config.retry.to_policy(),
        }
    }
}

/// JSON-over-HTTP client with auth, timeout, retry and cancellation.
#[derive(Debug, Clone)]
pub(crate) struct OpenAiHttp {
    client: reqwest::Client,
    base_url: Box<str>,
    retry: RetryPolicy,
    namespace: &'static str,
}

impl OpenAiHttp {
    pub(crate) fn new(config: &OpenAiHttpConfig, namespace: &'static str) -> Result<Self> {
        if config.api_key.is_blank() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "api key must be set",
            ));
        }
        let base_url = match config.base_url.as_deref().map(str::trim) {
            Some("") => {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "base url must be non-empty",
                ));
            },
            Some(url) => url,
            None => DEFAULT_BASE_URL,
        };
        let base_url = base_url.trim_end_matches('/').to_owned().into_boxed_str();
        if config.timeout.is_zero() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "timeout must be greater than zero",
            ));
        }

        let mut headers = HeaderMap::new();
        let mut auth_header =
            HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose().trim())).map_err(
                |_| {
                    ErrorEnvelope::expected(
                        ErrorCode::invalid_input(),
                        "api key contains invalid header characters",
                    )
                },
            )?;
        auth_header.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_header);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::new(namespace, "client_init_failed"),
                    format!("failed to build HTTP client: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?;

        Ok(Self {
            client,
            base_url,
            retry: config.retry,
            namespace,
        })
    }

    /// POST `body` to `{base}{path}` and decode the JSON response.
    pub(crate) async fn post_json<Req, Resp>(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &Req,
        operation: &'static str,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::new(self.namespace, "encode_failed"),
                format!("failed to encode request: {error}"),
                ErrorClass::NonRetriable,
            )
        })?;
        let endpoint = format!("{}{path}", self.base_url);

        let mut send = || self.send_once(ctx, &endpoint, payload.clone(), operation);
        retry_async_with_observer(ctx, self.retry, operation, &mut send, |attempt, error| {
            tracing::debug!(
                operation,
                attempt,
                code = %error.code,
                "retrying remote call"
            );
        })
        .await
    }

    async fn send_once<Resp>(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        payload: Vec<u8>,
        operation: &'static str,
    ) -> Result<Resp>
    where
        Resp: DeserializeOwned,
    {
        ctx.ensure_not_cancelled(operation)?;

        let response = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(operation)),
            result = self.client.post(endpoint).body(payload).send() => {
                result.map_err(|error| map_reqwest_error(self.namespace, &error))?
            }
        };

        let status = response.status();
        let bytes = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(operation)),
            result = response.bytes() => {
                result.map_err(|error| map_reqwest_error(self.namespace, &error))?
            },
        };

        if !status.is_success() {
            return Err(map_http_error(self.namespace, status, &bytes));
        }

        serde_json::from_slice(&bytes).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::new(self.namespace, "invalid_response"),
                format!("failed to decode response: {error}"),
                ErrorClass::NonRetriable,
            )
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<serde_json::Value>,
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

fn map_reqwest_error(namespace: &'static str, error: &reqwest::Error) -> ErrorEnvelope {
    if error.is_timeout() {
        return ErrorEnvelope::unexpected(
            ErrorCode::timeout(),
            "request timed out",
            ErrorClass::Retriable,
        );
    }
    if error.is_connect() {
        return ErrorEnvelope::unexpected(
            ErrorCode::io(),
            format!("connection failed: {error}"),
            ErrorClass::Retriable,
        );
    }
    ErrorEnvelope::unexpected(
        ErrorCode::new(namespace, "request_failed"),
        format!("request failed: {error}"),
        ErrorClass::NonRetriable,
    )
}

fn map_http_error(
    namespace: &'static str,
    status: StatusCode,
    payload: &[u8],
) -> ErrorEnvelope {
    let parsed = serde_json::from_slice::<OpenAiErrorResponse>(payload).ok();
    let message = parsed.as_ref().map_or_else(
        || format!("request failed with status {}", status.as_u16()),
        |parsed| parsed.error.message.clone(),
    );

    let mut envelope = match status.as_u16() {
        400 | 404 | 422 => ErrorEnvelope::expected(ErrorCode::invalid_input(), message),
        401 | 403 => ErrorEnvelope::expected(ErrorCode::permission_denied(), message),
        408 => ErrorEnvelope::unexpected(ErrorCode::timeout(), message, ErrorClass::Retriable),
        429 => ErrorEnvelope::unexpected(ErrorCode::rate_limited(), message, ErrorClass::Retriable),
        _ if status.is_server_error() => ErrorEnvelope::unexpected(
            ErrorCode::dependency_unavailable(),
            message,
            ErrorClass::Retriable,
        ),
        _ => ErrorEnvelope::unexpected(
            ErrorCode::new(namespace, "http_error"),
            message,
            ErrorClass::NonRetriable,
        ),
    };

    if let Some(detail) = parsed.map(|parsed| parsed.error) {
        if let Some(error_type) = detail.error_type {
            envelope = envelope.with_metadata("error_type", error_type);
        }
        if let Some(code) = detail.code {
            let code = code
                .as_str()
                .map_or_else(|| code.to_string(), str::to_string);
            envelope = envelope.with_metadata("error_code", code);
        }
    }

    envelope.with_metadata("status", status.as_u16().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(base_url: Option<&str>) -> OpenAiHttpConfig {
        OpenAiHttpConfig {
            api_key: SecretString::new("example"), // pragma: allowlist secret
            base_url: base_url.map(Into::into),
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::no_retry(),
        }
    }

    #[test]
    fn rate_limit_is_retriable() {
        let payload = serde_json::to_vec(&json!({ "error": { "message": "slow down" } }))
            .unwrap_or_default();
        let envelope = map_http_error("embedding", StatusCode::TOO_MANY_REQUESTS, &payload);
        assert_eq!(envelope.class, ErrorClass::Retriable);
        assert_eq!(envelope.code, ErrorCode::rate_limited());
        assert_eq!(envelope.message, "slow down");
        assert_eq!(envelope.metadata.get("status").map(String::as_str), Some("429"));
    }

    #[test]
    fn auth_failures_are_expected_and_keep_provider_code() {
        let payload = serde_json::to_vec(&json!({
            "error": { "message": "bad key", "type": "auth", "code": "invalid_api_key" }
        }))
        .unwrap_or_default();
        let envelope = map_http_error("completion", StatusCode::UNAUTHORIZED, &payload);
        assert_eq!(envelope.code, ErrorCode::permission_denied());
        assert_eq!(
            envelope.metadata.get("error_code").map(String::as_str),
            Some("invalid_api_key")
        );
    }

    #[test]
    fn non_json_server_errors_are_retriable() {
        let envelope = map_http_error("embedding", StatusCode::BAD_GATEWAY, b"<html>");
        assert!(envelope.class.is_retriable());
        assert_eq!(envelope.message, "request failed with status 502");
    }

    #[test]
    fn blank_credentials_and_base_urls_are_rejected() {
        let mut blank_key = config(None);
        blank_key.api_key = SecretString::new("   ");
        assert!(OpenAiHttp::new(&blank_key, "embedding").is_err());
        assert!(OpenAiHttp::new(&config(Some("  ")), "embedding").is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() -> Result<()> {
        let http = OpenAiHttp::new(&config(Some("http://localhost:9/v1/")), "embedding")?;
        assert_eq!(http.base_url.as_ref(), "http://localhost:9/v1");
        let default = OpenAiHttp::new(&config(None), "embedding")?;
        assert_eq!(default.base_url.as_ref(), DEFAULT_BASE_URL);
        Ok(())
    }
}
