//! Config loading helpers (defaults + file + env).
//!
//! Precedence, highest wins: env overrides, then the config file, then
//! `AppConfig::default()`.

use crate::{AppConfig, AppEnv, ValidatedAppConfig, apply_env_overrides};
use kwcache_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Load the config from an optional file path and parsed env overrides.
pub fn load_app_config_from_path(
    config_path: Option<&Path>,
    env: &AppEnv,
) -> Result<ValidatedAppConfig, ErrorEnvelope> {
    let config = match config_path {
        None => AppConfig::default(),
        Some(path) => {
            let config_text = read_config_file(path)?;
            let format = detect_config_format(path)?;
            parse_config_unvalidated(&config_text, format)?
        },
    };

    // env is applied last and also validates/normalizes the resulting config.
    apply_env_overrides(config, env)
}

/// Load the config from the process env and an optional file path.
pub fn load_app_config_std_env(
    config_path: Option<&Path>,
) -> Result<(ValidatedAppConfig, AppEnv), ErrorEnvelope> {
    let env = AppEnv::from_std_env().map_err(ErrorEnvelope::from)?;
    let config = load_app_config_from_path(config_path, &env)?;
    Ok((config, env))
}

/// Serialize the config as deterministic pretty JSON (with trailing newline).
pub fn to_pretty_json(config: &AppConfig) -> Result<String, ErrorEnvelope> {
    let mut output = serde_json::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to serialize config: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

/// Serialize the config as deterministic pretty TOML (with trailing newline).
pub fn to_pretty_toml(config: &AppConfig) -> Result<String, ErrorEnvelope> {
    let mut output = toml::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::new("config", "serialize_toml"),
            format!("failed to serialize config TOML: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

fn parse_config_unvalidated(input: &str, format: ConfigFormat) -> Result<AppConfig, ErrorEnvelope> {
    match format {
        ConfigFormat::Json => serde_json::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_json"),
                format!("invalid config JSON: {error}"),
            )
            .with_metadata("source", "config")
        }),
        ConfigFormat::Toml => toml::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_toml"),
                format!("invalid config TOML: {error}"),
            )
            .with_metadata("source", "config")
        }),
    }
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::new("config", "config_file_not_found"),
            std::io::ErrorKind::PermissionDenied => {
                ErrorCode::new("config", "config_file_permission_denied")
            },
            _ => ErrorCode::new("config", "config_file_io"),
        };

        ErrorEnvelope::expected(code, format!("failed to read config file: {error}"))
            .with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn detect_config_format(path: &Path) -> Result<ConfigFormat, ErrorEnvelope> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        None | Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(other) => Err(ErrorEnvelope::expected(
            ErrorCode::new("config", "unsupported_format"),
            "unsupported config format; use .json or .toml",
        )
        .with_metadata("extension", other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::error::Error;

    #[test]
    fn missing_path_uses_defaults() -> Result<(), Box<dyn Error>> {
        let config = load_app_config_from_path(None, &AppEnv::default())?;
        assert_eq!(config.as_ref(), &AppConfig::default());
        Ok(())
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let result = detect_config_format(Path::new("kwcache.yaml"));
        assert!(matches!(
            result,
            Err(error) if error.code == ErrorCode::new("config", "unsupported_format")
        ));
    }

    #[test]
    fn missing_file_reports_path() -> Result<(), Box<dyn Error>> {
        let path = Path::new("/definitely/not/here/kwcache.toml");
        let error = load_app_config_from_path(Some(path), &AppEnv::default())
            .err()
            .ok_or("expected missing file error")?;
        assert_eq!(error.code, ErrorCode::new("config", "config_file_not_found"));
        assert_eq!(
            error.metadata.get("path").map(String::as_str),
            Some("/definitely/not/here/kwcache.toml")
        );
        Ok(())
    }

    #[test]
    fn serialization_is_deterministic() -> Result<(), Box<dyn Error>> {
        let config = AppConfig::default();
        assert_eq!(to_pretty_json(&config)?, to_pretty_json(&config)?);
        let toml_text = to_pretty_toml(&config)?;
        assert!(toml_text.contains("[store]"));
        Ok(())
    }

    #[test]
    fn env_beats_file_values() -> Result<(), Box<dyn Error>> {
        let mut config = parse_config_unvalidated(
            r#"{ "store": { "path": "from-file.db" } }"#,
            ConfigFormat::Json,
        )?;
        assert_eq!(config.store.path.as_ref(), "from-file.db");

        let mut map = BTreeMap::new();
        map.insert("KWCACHE_STORE_PATH".to_string(), "from-env.db".to_string());
        let env = AppEnv::from_map(&map)?;
        config = apply_env_overrides(config, &env)?.into_inner();
        assert_eq!(config.store.path.as_ref(), "from-env.db");
        Ok(())
    }
}
