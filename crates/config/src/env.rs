//! Environment variable parsing and env-to-config merging.
//!
//! Env parsing is strict: a variable that is present but empty or malformed
//! fails fast. Secret values never appear in error metadata.

use crate::schema::{AppConfig, ValidatedAppConfig};
use kwcache_shared::{ErrorCode, ErrorEnvelope, REDACTED_VALUE, SecretString, is_secret_key};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Env var: keyword store file path.
pub const ENV_STORE_PATH: &str = "KWCACHE_STORE_PATH";
/// Env var: keyword store busy timeout in milliseconds.
pub const ENV_STORE_BUSY_TIMEOUT_MS: &str = "KWCACHE_STORE_BUSY_TIMEOUT_MS";
/// Env var: LLM service base URL.
pub const ENV_LLM_BASE_URL: &str = "KWCACHE_LLM_BASE_URL";
/// Env var: LLM service base URL (alias).
pub const ENV_LLM_BASE_URL_ALIAS: &str = "LLM_BASE_URL";
/// Env var: LLM service API key (secret).
pub const ENV_LLM_API_KEY: &str = "KWCACHE_LLM_API_KEY";
/// Env var: LLM service API key (alias).
pub const ENV_LLM_API_KEY_ALIAS: &str = "LLM_API_KEY";
/// Env var: embedding model.
pub const ENV_EMBEDDING_MODEL: &str = "KWCACHE_EMBEDDING_MODEL";
/// Env var: completion model.
pub const ENV_COMPLETION_MODEL: &str = "KWCACHE_COMPLETION_MODEL";
/// Env var: LLM request timeout in milliseconds.
pub const ENV_LLM_TIMEOUT_MS: &str = "KWCACHE_LLM_TIMEOUT_MS";
/// Env var: retry max attempts for LLM requests.
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "KWCACHE_RETRY_MAX_ATTEMPTS";

const ALL_VARS: [&str; 10] = [
    ENV_STORE_PATH,
    ENV_STORE_BUSY_TIMEOUT_MS,
    ENV_LLM_BASE_URL,
    ENV_LLM_BASE_URL_ALIAS,
    ENV_LLM_API_KEY,
    ENV_LLM_API_KEY_ALIAS,
    ENV_EMBEDDING_MODEL,
    ENV_COMPLETION_MODEL,
    ENV_LLM_TIMEOUT_MS,
    ENV_RETRY_MAX_ATTEMPTS,
];

/// Typed env-derived overrides for `AppConfig`, plus env-only secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppEnv {
    /// Override for `store.path`.
    pub store_path: Option<Box<str>>,
    /// Override for `store.busyTimeoutMs`.
    pub store_busy_timeout_ms: Option<u64>,
    /// Override for `llm.baseUrl`.
    pub llm_base_url: Option<Box<str>>,
    /// API key for the LLM service. Never part of the config file.
    pub llm_api_key: Option<SecretString>,
    /// Override for `llm.embeddingModel`.
    pub embedding_model: Option<Box<str>>,
    /// Override for `llm.completionModel`.
    pub completion_model: Option<Box<str>>,
    /// Override for `llm.timeoutMs`.
    pub llm_timeout_ms: Option<u64>,
    /// Override for `llm.retry.maxAttempts`.
    pub retry_max_attempts: Option<u32>,
}

impl AppEnv {
    /// Parse env overrides from a key/value map (useful for tests and fixtures).
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            store_path: parse_optional_trimmed_string(map, ENV_STORE_PATH)?,
            store_busy_timeout_ms: parse_optional_u64(map, ENV_STORE_BUSY_TIMEOUT_MS)?,
            llm_base_url: parse_optional_url_string_any(
                map,
                &[ENV_LLM_BASE_URL, ENV_LLM_BASE_URL_ALIAS],
            )?,
            llm_api_key: parse_optional_secret_any(map, &[ENV_LLM_API_KEY, ENV_LLM_API_KEY_ALIAS])?,
            embedding_model: parse_optional_trimmed_string(map, ENV_EMBEDDING_MODEL)?,
            completion_model: parse_optional_trimmed_string(map, ENV_COMPLETION_MODEL)?,
            llm_timeout_ms: parse_optional_u64(map, ENV_LLM_TIMEOUT_MS)?,
            retry_max_attempts: parse_optional_u32(map, ENV_RETRY_MAX_ATTEMPTS)?,
        })
    }

    /// Parse env overrides from the current process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        let mut map = BTreeMap::new();
        for name in ALL_VARS {
            if let Ok(value) = std::env::var(name) {
                map.insert(name.to_string(), value);
            }
        }
        Self::from_map(&map)
    }
}

/// Apply env overrides to a config, then validate and normalize it.
pub fn apply_env_overrides(
    mut config: AppConfig,
    env: &AppEnv,
) -> Result<ValidatedAppConfig, ErrorEnvelope> {
    if let Some(path) = env.store_path.as_ref() {
        config.store.path = path.clone();
    }
    if let Some(value) = env.store_busy_timeout_ms {
        config.store.busy_timeout_ms = value;
    }
    if let Some(url) = env.llm_base_url.as_ref() {
        config.llm.base_url = Some(url.clone());
    }
    if let Some(model) = env.embedding_model.as_ref() {
        config.llm.embedding_model = model.clone();
    }
    if let Some(model) = env.completion_model.as_ref() {
        config.llm.completion_model = Some(model.clone());
    }
    if let Some(value) = env.llm_timeout_ms {
        config.llm.timeout_ms = value;
    }
    if let Some(value) = env.retry_max_attempts {
        config.llm.retry.max_attempts = value;
    }

    config.validate_and_normalize().map_err(Into::into)
}

/// Validation failures when parsing env variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// A secret env var was present but empty after trimming.
    EmptySecret {
        /// Env var name.
        var: &'static str,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// URL env var had an invalid value.
    InvalidUrl {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
}

impl EnvParseError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyValue { .. } | Self::EmptySecret { .. } => {
                ErrorCode::new("config", "empty_env_var")
            },
            Self::InvalidInt { .. } => ErrorCode::new("config", "invalid_env_int"),
            Self::InvalidUrl { .. } => ErrorCode::new("config", "invalid_env_url"),
        }
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { var } | Self::EmptySecret { var } => {
                write!(formatter, "{var} must be non-empty")
            },
            Self::InvalidInt { var, .. } => write!(formatter, "{var} must be an integer"),
            Self::InvalidUrl { var, .. } => write!(formatter, "{var} must be a valid URL"),
        }
    }
}

impl std::error::Error for EnvParseError {}

impl From<EnvParseError> for ErrorEnvelope {
    fn from(error: EnvParseError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());

        match error {
            EnvParseError::EmptyValue { var } | EnvParseError::EmptySecret { var } => {
                envelope.with_metadata("env_var", var)
            },
            EnvParseError::InvalidInt { var, value } | EnvParseError::InvalidUrl { var, value } => {
                envelope
                    .with_metadata("env_var", var)
                    .with_metadata("value", redact_value(var, &value))
            },
        }
    }
}

fn parse_optional_trimmed_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    Ok(Some(trimmed.into()))
}

fn parse_optional_secret(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<SecretString>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptySecret { var });
    }

    Ok(Some(SecretString::new(trimmed)))
}

fn parse_optional_secret_any(
    map: &BTreeMap<String, String>,
    vars: &[&'static str],
) -> Result<Option<SecretString>, EnvParseError> {
    for var in vars {
        if map.contains_key(*var) {
            return parse_optional_secret(map, var);
        }
    }
    Ok(None)
}

fn parse_optional_u64(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_u32(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u32>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_url_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    let invalid = || EnvParseError::InvalidUrl {
        var,
        value: raw.clone(),
    };
    let parsed = Url::parse(trimmed).map_err(|_| invalid())?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(invalid());
    }

    // Keep the caller's spelling; `Url` would append a trailing slash to bare hosts.
    Ok(Some(trimmed.into()))
}

fn parse_optional_url_string_any(
    map: &BTreeMap<String, String>,
    vars: &[&'static str],
) -> Result<Option<Box<str>>, EnvParseError> {
    for var in vars {
        if map.contains_key(*var) {
            return parse_optional_url_string(map, var);
        }
    }
    Ok(None)
}

fn redact_value(var: &str, value: &str) -> String {
    if is_secret_key(var) {
        REDACTED_VALUE.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn env_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn missing_vars_default_to_none() -> Result<(), Box<dyn Error>> {
        let env = AppEnv::from_map(&BTreeMap::new())?;
        assert_eq!(env, AppEnv::default());
        Ok(())
    }

    #[test]
    fn prefixed_names_win_over_aliases() -> Result<(), Box<dyn Error>> {
        let env = AppEnv::from_map(&env_map(&[
            (ENV_LLM_BASE_URL, "https://primary.example.com/v1"),
            (ENV_LLM_BASE_URL_ALIAS, "https://alias.example.com/v1"),
            (ENV_LLM_API_KEY_ALIAS, "sk-alias"),
        ]))?;

        assert_eq!(
            env.llm_base_url.as_deref(),
            Some("https://primary.example.com/v1")
        );
        assert_eq!(
            env.llm_api_key.as_ref().map(SecretString::expose),
            Some("sk-alias")
        );
        Ok(())
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let error = AppEnv::from_map(&env_map(&[(ENV_LLM_BASE_URL_ALIAS, "ftp://example.com")]));
        assert!(matches!(
            error,
            Err(EnvParseError::InvalidUrl {
                var: ENV_LLM_BASE_URL_ALIAS,
                ..
            })
        ));
    }

    #[test]
    fn invalid_ints_echo_the_value() -> Result<(), Box<dyn Error>> {
        let error = AppEnv::from_map(&env_map(&[(ENV_STORE_BUSY_TIMEOUT_MS, "soon")]))
            .err()
            .ok_or("expected int error")?;
        let envelope = ErrorEnvelope::from(error);
        assert_eq!(envelope.code, ErrorCode::new("config", "invalid_env_int"));
        assert_eq!(envelope.metadata.get("value").map(String::as_str), Some("soon"));
        Ok(())
    }

    #[test]
    fn empty_secrets_do_not_echo_value() -> Result<(), Box<dyn Error>> {
        let error = AppEnv::from_map(&env_map(&[(ENV_LLM_API_KEY, "   ")]))
            .err()
            .ok_or("expected secret error")?;
        let envelope = ErrorEnvelope::from(error);

        assert_eq!(envelope.code, ErrorCode::new("config", "empty_env_var"));
        assert_eq!(
            envelope.metadata.get("env_var").map(String::as_str),
            Some(ENV_LLM_API_KEY)
        );
        assert!(!envelope.metadata.contains_key("value"));
        Ok(())
    }

    #[test]
    fn overrides_are_applied_then_validated() -> Result<(), Box<dyn Error>> {
        let env = AppEnv::from_map(&env_map(&[
            (ENV_STORE_PATH, "/tmp/kw.db"),
            (ENV_RETRY_MAX_ATTEMPTS, "5"),
        ]))?;
        let config = apply_env_overrides(AppConfig::default(), &env)?;
        assert_eq!(config.store.path.as_ref(), "/tmp/kw.db");
        assert_eq!(config.llm.retry.max_attempts, 5);

        let env = AppEnv::from_map(&env_map(&[(ENV_RETRY_MAX_ATTEMPTS, "0")]))?;
        assert!(apply_env_overrides(AppConfig::default(), &env).is_err());
        Ok(())
    }
}
