//! Config command handlers.

use crate::error::{CliError, ExitCode};
use crate::format::{OutputMode, pretty_json};
use crate::{CliOutput, format_error_output, log_info, wiring};
use kwcache_config::{to_pretty_json, to_pretty_toml};
use std::path::Path;

/// Show the effective config. The API key is reported as present or absent only.
pub fn run_config_show(
    mode: OutputMode,
    config_path: Option<&Path>,
) -> Result<CliOutput, CliError> {
    let loaded = match wiring::load(config_path) {
        Ok(loaded) => loaded,
        Err(error) => return Ok(format_error_output(mode, &error)),
    };
    let api_key_set = loaded.env.llm_api_key.is_some();

    let mut stderr = String::new();
    log_info(&mut stderr, "config show completed", mode.no_progress);

    let stdout = if mode.is_json() {
        let config_json = match to_pretty_json(loaded.config.as_ref()) {
            Ok(json) => json,
            Err(error) => return Ok(format_error_output(mode, &error)),
        };
        let config_value: serde_json::Value = serde_json::from_str(config_json.trim())?;
        pretty_json(&serde_json::json!({
            "status": "ok",
            "configPath": config_path.map(|value| value.to_string_lossy().to_string()),
            "apiKeySet": api_key_set,
            "effectiveConfig": config_value,
        }))?
    } else {
        let config_toml = match to_pretty_toml(loaded.config.as_ref()) {
            Ok(toml) => toml,
            Err(error) => return Ok(format_error_output(mode, &error)),
        };
        format!("status: ok\napiKeySet: {api_key_set}\nconfig:\n{config_toml}")
    };

    Ok(CliOutput {
        stdout,
        stderr,
        exit_code: ExitCode::Ok,
    })
}
