//! Text completion contract.

use crate::BoxFuture;
use kwcache_shared::{RequestContext, Result};

/// Sampling options for a completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    /// Sampling temperature. `0.0` is deterministic.
    pub temperature: f32,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            json_mode: false,
        }
    }
}

/// Owned request for a single-turn completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System instructions.
    pub instructions: Box<str>,
    /// User input.
    pub input: Box<str>,
    /// Sampling options.
    pub options: CompletionOptions,
}

impl CompletionRequest {
    /// Build a request with default options.
    pub fn new(instructions: impl Into<Box<str>>, input: impl Into<Box<str>>) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
            options: CompletionOptions::default(),
        }
    }

    /// Replace the sampling options.
    #[must_use]
    pub const fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Boundary contract for text completion.
pub trait CompletionPort: Send + Sync {
    /// Model name used for completions.
    fn model(&self) -> &str;

    /// Run one completion and return the trimmed response text.
    fn complete(
        &self,
        ctx: &RequestContext,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<Box<str>>>;
}
