//! Complete command handler.

use crate::error::{CliError, ExitCode};
use crate::format::{OutputMode, pretty_json};
use crate::{CliOutput, format_error_output, read_stdin, wiring};
use kwcache_ports::{CompletionOptions, CompletionPort, CompletionRequest};
use kwcache_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::path::Path;

/// Parsed flags for the complete command.
#[derive(Debug, Clone)]
pub struct CompleteCommandInput {
    pub instructions: String,
    pub input: Option<String>,
    pub temperature: f32,
    pub json_mode: bool,
}

/// Run the complete command.
pub fn run_complete(
    mode: OutputMode,
    config_path: Option<&Path>,
    command: CompleteCommandInput,
) -> Result<CliOutput, CliError> {
    let input = match command.input {
        Some(input) => input,
        None => read_stdin()?,
    };
    let options = CompletionOptions {
        temperature: command.temperature,
        json_mode: command.json_mode,
    };

    let outcome = validate_options(options).and_then(|()| {
        let loaded = wiring::load(config_path)?;
        let adapter = wiring::completion_adapter(&loaded)?;
        let request = CompletionRequest::new(command.instructions, input).with_options(options);
        let reply = wiring::run_async(RequestContext::new_request(), |ctx| async move {
            adapter.complete(&ctx, request).await
        })?;
        Ok((loaded.config.llm.completion_model.clone(), reply))
    });

    match outcome {
        Ok((model, reply)) => format_complete_output(mode, model.as_deref(), &reply),
        Err(error) => Ok(format_error_output(mode, &error)),
    }
}

fn validate_options(options: CompletionOptions) -> Result<()> {
    if !options.temperature.is_finite() || options.temperature < 0.0 {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("temperature must be a non-negative number, got {}", options.temperature),
        ));
    }
    Ok(())
}

fn format_complete_output(
    mode: OutputMode,
    model: Option<&str>,
    reply: &str,
) -> Result<CliOutput, CliError> {
    let stdout = if mode.is_json() {
        pretty_json(&serde_json::json!({
            "status": "ok",
            "model": model,
            "content": reply,
        }))?
    } else {
        format!("{reply}\n")
    };

    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code: ExitCode::Ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_or_non_finite_temperatures_are_rejected() {
        for temperature in [-0.1, f32::NAN, f32::INFINITY] {
            let result = validate_options(CompletionOptions {
                temperature,
                json_mode: false,
            });
            assert_eq!(
                result.err().map(|error| error.code),
                Some(ErrorCode::invalid_input())
            );
        }
        assert!(validate_options(CompletionOptions::default()).is_ok());
    }
}
