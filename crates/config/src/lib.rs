//! # kwcache-config
//!
//! Configuration schema, env parsing, and file loading for kwcache.
//! This crate depends on `shared` only.

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (defaults + file + env).
pub mod load;
/// Configuration schema types and helpers.
pub mod schema;

pub use env::{AppEnv, EnvParseError, apply_env_overrides};
pub use load::{
    load_app_config_from_path, load_app_config_std_env, to_pretty_json, to_pretty_toml,
};
pub use schema::{
    AppConfig, CURRENT_CONFIG_VERSION, ConfigSchemaError, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_STORE_PATH, LlmConfig, RetryConfig, StoreConfig, ValidatedAppConfig,
    parse_app_config_json, parse_app_config_toml,
};
