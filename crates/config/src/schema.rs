//! Application configuration schema, defaults, validation, and normalization.
//!
//! - Deserialization uses `serde` (JSON or TOML).
//! - Validation is manual and returns typed errors mapped to `ErrorEnvelope`.
//! - Credentials never live here; they are read from the environment only.

use kwcache_shared::{ErrorCode, ErrorEnvelope, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Current supported configuration schema version.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Default on-disk location of the keyword store.
pub const DEFAULT_STORE_PATH: &str = ".kwcache/embeddings.db";
/// Default embedding model requested from the remote service.
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-exp-03-07";

const STORE_BUSY_TIMEOUT_MIN_MS: u64 = 0;
const STORE_BUSY_TIMEOUT_MAX_MS: u64 = 600_000;
const STORE_BUSY_TIMEOUT_DEFAULT_MS: u64 = 5_000;

const LLM_TIMEOUT_MIN_MS: u64 = 1_000;
const LLM_TIMEOUT_MAX_MS: u64 = 1_200_000;
const LLM_TIMEOUT_DEFAULT_MS: u64 = 60_000;

const RETRY_MAX_ATTEMPTS_MIN: u32 = 1;
const RETRY_MAX_ATTEMPTS_MAX: u32 = 10;
const RETRY_BASE_DELAY_MIN_MS: u64 = 1;
const RETRY_BASE_DELAY_MAX_MS: u64 = 60_000;
const RETRY_MAX_DELAY_MIN_MS: u64 = 1;
const RETRY_MAX_DELAY_MAX_MS: u64 = 600_000;
const RETRY_JITTER_RATIO_PCT_MAX: u32 = 100;

/// Strips credentials from a URL before it is echoed in an error.
fn sanitize_url_for_error(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() || !parsed.username().is_empty() {
                if parsed.set_username("").is_err() || parsed.set_password(None).is_err() {
                    return "[invalid url: credentials]".to_string();
                }
            }
            parsed.to_string()
        },
        Err(error) => format!("[invalid url: {error}]"),
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct AppConfig {
    /// Schema version for forward-compatible migrations.
    pub version: u32,
    /// Keyword store settings.
    pub store: StoreConfig,
    /// Remote embedding and completion service settings.
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedAppConfig, ConfigSchemaError> {
        if self.version != CURRENT_CONFIG_VERSION {
            return Err(ConfigSchemaError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }

        self.store.normalize();
        self.store.validate()?;
        self.llm.normalize();
        self.llm.validate()?;

        Ok(ValidatedAppConfig { raw: self })
    }
}

/// Validated config wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAppConfig {
    raw: AppConfig,
}

impl ValidatedAppConfig {
    /// Borrow the raw config.
    #[must_use]
    pub const fn as_ref(&self) -> &AppConfig {
        &self.raw
    }

    /// Consume the wrapper and return the raw config.
    #[must_use]
    pub fn into_inner(self) -> AppConfig {
        self.raw
    }

    /// Store busy timeout as a duration.
    #[must_use]
    pub const fn store_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.raw.store.busy_timeout_ms)
    }

    /// Remote request timeout as a duration.
    #[must_use]
    pub const fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.raw.llm.timeout_ms)
    }

    /// Retry policy for remote calls.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.raw.llm.retry.to_policy()
    }
}

impl std::ops::Deref for ValidatedAppConfig {
    type Target = AppConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// Parse a config from a JSON string, applying validation and normalization.
pub fn parse_app_config_json(input: &str) -> Result<ValidatedAppConfig, ErrorEnvelope> {
    let config: AppConfig = serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid config JSON: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

/// Parse a config from a TOML string, applying validation and normalization.
pub fn parse_app_config_toml(input: &str) -> Result<ValidatedAppConfig, ErrorEnvelope> {
    let config: AppConfig = toml::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_toml"),
            format!("invalid config TOML: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

/// Keyword store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct StoreConfig {
    /// Path of the SQLite file. Parent directories are created on open.
    pub path: Box<str>,
    /// How long a writer waits on a locked database before failing (ms).
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_STORE_PATH.into(),
            busy_timeout_ms: STORE_BUSY_TIMEOUT_DEFAULT_MS,
        }
    }
}

impl StoreConfig {
    fn normalize(&mut self) {
        normalize_boxed_str(&mut self.path);
    }

    fn validate(&self) -> Result<(), ConfigSchemaError> {
        if self.path.is_empty() {
            return Err(ConfigSchemaError::EmptyValue {
                section: "store",
                field: "path",
            });
        }
        validate_timeout_ms(
            "store",
            "busyTimeoutMs",
            self.busy_timeout_ms,
            STORE_BUSY_TIMEOUT_MIN_MS,
            STORE_BUSY_TIMEOUT_MAX_MS,
        )
    }
}

/// Remote LLM service configuration (OpenAI-compatible endpoints).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct LlmConfig {
    /// Base URL; `/embeddings` and `/chat/completions` are appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Box<str>>,
    /// Model used for embeddings.
    pub embedding_model: Box<str>,
    /// Model used for completions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_model: Option<Box<str>>,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
    /// Retry policy for retriable failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            completion_model: None,
            timeout_ms: LLM_TIMEOUT_DEFAULT_MS,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    fn normalize(&mut self) {
        normalize_optional_trimmed(&mut self.base_url);
        normalize_boxed_str(&mut self.embedding_model);
        normalize_optional_trimmed(&mut self.completion_model);
    }

    fn validate(&self) -> Result<(), ConfigSchemaError> {
        if let Some(url) = self.base_url.as_deref() {
            validate_http_url("llm", "baseUrl", url)?;
        }
        if self.embedding_model.is_empty() {
            return Err(ConfigSchemaError::EmptyValue {
                section: "llm",
                field: "embeddingModel",
            });
        }
        validate_timeout_ms(
            "llm",
            "timeoutMs",
            self.timeout_ms,
            LLM_TIMEOUT_MIN_MS,
            LLM_TIMEOUT_MAX_MS,
        )?;
        self.retry.validate()
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RetryConfig {
    /// Maximum attempts (including the first attempt).
    pub max_attempts: u32,
    /// Base delay for exponential backoff (ms).
    pub base_delay_ms: u64,
    /// Maximum delay cap for backoff (ms).
    pub max_delay_ms: u64,
    /// Jitter ratio as a percentage (0..=100).
    pub jitter_ratio_pct: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            jitter_ratio_pct: policy.jitter_ratio_pct,
        }
    }
}

impl RetryConfig {
    /// Runtime retry policy for these settings.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_ratio_pct: self.jitter_ratio_pct,
        }
    }

    fn validate(&self) -> Result<(), ConfigSchemaError> {
        validate_limit(
            "llm.retry",
            "maxAttempts",
            u64::from(self.max_attempts),
            u64::from(RETRY_MAX_ATTEMPTS_MIN),
            u64::from(RETRY_MAX_ATTEMPTS_MAX),
        )?;
        validate_timeout_ms(
            "llm.retry",
            "baseDelayMs",
            self.base_delay_ms,
            RETRY_BASE_DELAY_MIN_MS,
            RETRY_BASE_DELAY_MAX_MS,
        )?;
        validate_timeout_ms(
            "llm.retry",
            "maxDelayMs",
            self.max_delay_ms,
            RETRY_MAX_DELAY_MIN_MS,
            RETRY_MAX_DELAY_MAX_MS,
        )?;
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigSchemaError::LimitOutOfRange {
                section: "llm.retry",
                field: "maxDelayMs",
                value: self.max_delay_ms,
                min: self.base_delay_ms,
                max: RETRY_MAX_DELAY_MAX_MS,
            });
        }
        validate_limit(
            "llm.retry",
            "jitterRatioPct",
            u64::from(self.jitter_ratio_pct),
            0,
            u64::from(RETRY_JITTER_RATIO_PCT_MAX),
        )
    }
}

/// Typed validation errors for the configuration schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// The config version is not supported by this binary.
    UnsupportedVersion {
        /// Version found in the config.
        found: u32,
        /// Version supported by this crate.
        supported: u32,
    },
    /// A required string field is empty after trimming.
    EmptyValue {
        /// Schema section (e.g. `store`).
        section: &'static str,
        /// Field name in the config file (e.g. `path`).
        field: &'static str,
    },
    /// A timeout value is out of bounds.
    TimeoutOutOfRange {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Value provided (ms).
        value_ms: u64,
        /// Minimum allowed value (ms).
        min_ms: u64,
        /// Maximum allowed value (ms).
        max_ms: u64,
    },
    /// A numeric limit is out of bounds.
    LimitOutOfRange {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Value provided.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },
    /// A URL entry is invalid.
    InvalidUrl {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Invalid URL value.
        url: String,
    },
}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedVersion { .. } => ErrorCode::new("config", "unsupported_version"),
            Self::EmptyValue { .. } => ErrorCode::new("config", "empty_value"),
            Self::TimeoutOutOfRange { .. } => ErrorCode::new("config", "invalid_timeout"),
            Self::LimitOutOfRange { .. } => ErrorCode::new("config", "invalid_limit"),
            Self::InvalidUrl { .. } => ErrorCode::new("config", "invalid_url"),
        }
    }
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found, supported } => write!(
                formatter,
                "unsupported config version: {found} (supported: {supported})"
            ),
            Self::EmptyValue { section, field } => {
                write!(formatter, "{section}.{field} must be non-empty")
            },
            Self::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min_ms}, {max_ms}] ms (got {value_ms})"
            ),
            Self::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min}, {max}] (got {value})"
            ),
            Self::InvalidUrl { section, field, .. } => {
                write!(formatter, "invalid URL for {section}.{field}")
            },
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());

        match error {
            ConfigSchemaError::UnsupportedVersion { found, supported } => envelope
                .with_metadata("found", found.to_string())
                .with_metadata("supported", supported.to_string()),
            ConfigSchemaError::EmptyValue { section, field } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field),
            ConfigSchemaError::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value_ms", value_ms.to_string())
                .with_metadata("min_ms", min_ms.to_string())
                .with_metadata("max_ms", max_ms.to_string()),
            ConfigSchemaError::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value", value.to_string())
                .with_metadata("min", min.to_string())
                .with_metadata("max", max.to_string()),
            ConfigSchemaError::InvalidUrl {
                section,
                field,
                url,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("url", sanitize_url_for_error(&url)),
        }
    }
}

const fn validate_timeout_ms(
    section: &'static str,
    field: &'static str,
    value_ms: u64,
    min_ms: u64,
    max_ms: u64,
) -> Result<(), ConfigSchemaError> {
    if value_ms < min_ms || value_ms > max_ms {
        return Err(ConfigSchemaError::TimeoutOutOfRange {
            section,
            field,
            value_ms,
            min_ms,
            max_ms,
        });
    }
    Ok(())
}

const fn validate_limit(
    section: &'static str,
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
) -> Result<(), ConfigSchemaError> {
    if value < min || value > max {
        return Err(ConfigSchemaError::LimitOutOfRange {
            section,
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn validate_http_url(
    section: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ConfigSchemaError> {
    let invalid = || ConfigSchemaError::InvalidUrl {
        section,
        field,
        url: value.to_owned(),
    };
    let parsed = Url::parse(value).map_err(|_| invalid())?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(invalid());
    }
    Ok(())
}

fn normalize_optional_trimmed(value: &mut Option<Box<str>>) {
    let Some(raw) = value.take() else {
        return;
    };
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        *value = Some(trimmed.into());
    }
}

fn normalize_boxed_str(value: &mut Box<str>) {
    let trimmed = value.trim();
    if trimmed != value.as_ref() {
        *value = trimmed.into();
    }
}
