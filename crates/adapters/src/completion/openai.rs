//! OpenAI-compatible chat completion adapter.

use crate::openai_http::{OpenAiHttp, OpenAiHttpConfig};
use kwcache_ports::{BoxFuture, CompletionPort, CompletionRequest};
use kwcache_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde::{Deserialize, Serialize};

const OPERATION: &str = "openai_completion.complete";

/// OpenAI-compatible completion adapter configuration.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionConfig {
    /// Transport settings.
    pub http: OpenAiHttpConfig,
    /// Chat model name.
    pub model: Box<str>,
}

/// Completion adapter that calls `POST {base}/chat/completions`.
#[derive(Debug)]
pub struct OpenAiCompletion {
    http: OpenAiHttp,
    model: Box<str>,
}

impl OpenAiCompletion {
    /// Create a new completion adapter.
    pub fn new(config: &OpenAiCompletionConfig) -> Result<Self> {
        let model = config.model.trim();
        if model.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "completion model must be set",
            ));
        }
        Ok(Self {
            http: OpenAiHttp::new(&config.http, "completion")?,
            model: model.into(),
        })
    }

    async fn complete_once(
        &self,
        ctx: &RequestContext,
        request: CompletionRequest,
    ) -> Result<Box<str>> {
        ctx.ensure_not_cancelled(OPERATION)?;
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.instructions,
                },
                ChatMessage {
                    role: "user",
                    content: &request.input,
                },
            ],
            temperature: request.options.temperature,
            json_mode: request.options.json_mode,
        };
        let response: ChatResponse = self
            .http
            .post_json(ctx, "/chat/completions", &body, OPERATION)
            .await?;
        first_message(response)
    }
}

impl CompletionPort for OpenAiCompletion {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete(
        &self,
        ctx: &RequestContext,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<Box<str>>> {
        let ctx = ctx.clone();
        Box::pin(async move { self.complete_once(&ctx, request).await })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    json_mode: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_message(response: ChatResponse) -> Result<Box<str>> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| {
            ErrorEnvelope::unexpected(
                ErrorCode::new("completion", "invalid_response"),
                "completion response has no message content",
                ErrorClass::NonRetriable,
            )
        })?;
    Ok(content.trim().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_both_messages_and_options() -> std::result::Result<(), serde_json::Error> {
        let body = ChatRequest {
            model: "chat-model",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "be terse",
                },
                ChatMessage {
                    role: "user",
                    content: "hello",
                },
            ],
            temperature: 0.0,
            json_mode: true,
        };
        assert_eq!(
            serde_json::to_value(&body)?,
            json!({
                "model": "chat-model",
                "messages": [
                    { "role": "system", "content": "be terse" },
                    { "role": "user", "content": "hello" }
                ],
                "temperature": 0.0,
                "json_mode": true
            })
        );
        Ok(())
    }

    #[test]
    fn first_message_is_trimmed() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "  hi there \n" } }]
        }))?;
        assert_eq!(first_message(response)?.as_ref(), "hi there");
        Ok(())
    }

    #[test]
    fn empty_choices_are_invalid() {
        let error = first_message(ChatResponse { choices: Vec::new() }).err();
        assert_eq!(
            error.map(|error| error.code),
            Some(ErrorCode::new("completion", "invalid_response"))
        );
    }
}
