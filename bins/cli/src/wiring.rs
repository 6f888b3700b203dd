//! Builds adapters from the validated config and runs async commands.

use kwcache_adapters::completion::openai::{OpenAiCompletion, OpenAiCompletionConfig};
use kwcache_adapters::embedding::openai::{OpenAiEmbedding, OpenAiEmbeddingConfig};
use kwcache_adapters::log_sink::{LogSink, StderrLogSink};
use kwcache_adapters::logger::JsonLogger;
use kwcache_adapters::openai_http::OpenAiHttpConfig;
use kwcache_adapters::store::{KeywordEmbeddingStore, StoreOptions};
use kwcache_config::env::ENV_LLM_API_KEY;
use kwcache_config::{AppEnv, ValidatedAppConfig, load_app_config_std_env};
use kwcache_ports::{LogFields, LogLevel, LoggerPort};
use kwcache_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result, SecretString};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOG_FORMAT_ENV: &str = "KWCACHE_LOG_FORMAT";
const LOG_LEVEL_ENV: &str = "KWCACHE_LOG_LEVEL";

/// Effective config plus env-only secrets.
pub struct Loaded {
    pub config: ValidatedAppConfig,
    pub env: AppEnv,
}

pub fn load(config_path: Option<&Path>) -> Result<Loaded> {
    let (config, env) = load_app_config_std_env(config_path)?;
    Ok(Loaded { config, env })
}

/// Open the configured store, run `body`, then close it.
pub fn with_store<T>(
    config: &ValidatedAppConfig,
    body: impl FnOnce(&mut KeywordEmbeddingStore) -> Result<T>,
) -> Result<T> {
    let options = StoreOptions {
        busy_timeout: config.store_busy_timeout(),
    };
    KeywordEmbeddingStore::scoped_with_options(&*config.store.path, options, body)
}

pub fn embedding_adapter(loaded: &Loaded) -> Result<OpenAiEmbedding> {
    let http = OpenAiHttpConfig::from_llm_config(api_key(&loaded.env)?, &loaded.config.llm);
    OpenAiEmbedding::new(&OpenAiEmbeddingConfig {
        http,
        model: Some(loaded.config.llm.embedding_model.clone()),
    })
}

pub fn completion_adapter(loaded: &Loaded) -> Result<OpenAiCompletion> {
    let model = loaded.config.llm.completion_model.clone().ok_or_else(|| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "missing_completion_model"),
            "set llm.completionModel or KWCACHE_COMPLETION_MODEL to run completions",
        )
    })?;
    let http = OpenAiHttpConfig::from_llm_config(api_key(&loaded.env)?, &loaded.config.llm);
    OpenAiCompletion::new(&OpenAiCompletionConfig { http, model })
}

fn api_key(env: &AppEnv) -> Result<SecretString> {
    env.llm_api_key.clone().ok_or_else(|| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "missing_api_key"),
            format!("set {ENV_LLM_API_KEY} to call the LLM service"),
        )
    })
}

/// JSON logger on stderr when `KWCACHE_LOG_FORMAT=json`, scoped to the request.
pub fn logger_from_env(ctx: &RequestContext) -> Option<Arc<dyn LoggerPort>> {
    let enabled = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .is_some_and(|value| value.eq_ignore_ascii_case("json"));
    if !enabled {
        return None;
    }

    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|value| LogLevel::parse(&value))
        .unwrap_or(LogLevel::Info);
    let sink: Arc<dyn LogSink> = Arc::new(StderrLogSink);
    let logger = JsonLogger::new(sink).with_min_level(level);

    let mut fields = LogFields::new();
    fields.insert(
        "correlationId".into(),
        Value::String(ctx.correlation_id().as_str().to_string()),
    );
    Some(Arc::from(logger.child(fields)))
}

/// Route adapter `tracing` events to stderr, filtered by `RUST_LOG` (off by default).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run `op` on a current-thread runtime. Ctrl-C cancels the request context.
pub fn run_async<F, T>(ctx: RequestContext, op: impl FnOnce(RequestContext) -> F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::io(),
                format!("failed to start async runtime: {error}"),
                ErrorClass::NonRetriable,
            )
        })?;

    runtime.block_on(async {
        let token = ctx.cancellation_token();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received, cancelling request");
                token.cancel();
            }
        });
        let result = op(ctx).await;
        watcher.abort();
        result
    })
}
