//! Resolve command handler.

use super::format_vector;
use crate::error::{CliError, ExitCode};
use crate::format::{OutputMode, pretty_json};
use crate::{CliOutput, format_error_output, log_info, wiring};
use kwcache_app::{
    ResolveEmbeddingsDeps, ResolveEmbeddingsInput, ResolveEmbeddingsOutput, resolve_embeddings,
};
use kwcache_shared::{RequestContext, Result};
use std::path::Path;
use std::sync::Arc;

/// Run the resolve command.
pub fn run_resolve(
    mode: OutputMode,
    config_path: Option<&Path>,
    keywords: &[String],
) -> Result<CliOutput, CliError> {
    match resolve(config_path, keywords) {
        Ok(output) => format_resolve_output(mode, &output),
        Err(error) => Ok(format_error_output(mode, &error)),
    }
}

fn resolve(config_path: Option<&Path>, keywords: &[String]) -> Result<ResolveEmbeddingsOutput> {
    let loaded = wiring::load(config_path)?;
    let ctx = RequestContext::new_request();
    let deps = ResolveEmbeddingsDeps {
        embedding: Arc::new(wiring::embedding_adapter(&loaded)?),
        logger: wiring::logger_from_env(&ctx),
    };
    let input = ResolveEmbeddingsInput {
        keywords: keywords.to_vec(),
    };

    wiring::with_store(&loaded.config, |store| {
        wiring::run_async(ctx, |ctx| async move {
            resolve_embeddings(&ctx, &deps, store, input).await
        })
    })
}

fn format_resolve_output(
    mode: OutputMode,
    output: &ResolveEmbeddingsOutput,
) -> Result<CliOutput, CliError> {
    let mut stderr = String::new();
    log_info(
        &mut stderr,
        &format!(
            "resolved {} keywords ({} cached, {} computed)",
            output.resolved.len(),
            output.hits(),
            output.computed()
        ),
        mode.no_progress,
    );

    let stdout = if mode.is_json() {
        let embeddings: Vec<serde_json::Value> = output
            .resolved
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "keyword": entry.keyword,
                    "source": entry.source.as_str(),
                    "vector": entry.vector.as_slice(),
                })
            })
            .collect();
        pretty_json(&serde_json::json!({
            "status": "ok",
            "hits": output.hits(),
            "computed": output.computed(),
            "inserted": output.insert.inserted,
            "embeddings": embeddings,
        }))?
    } else {
        let mut out = format!(
            "status: ok\nhits: {}\ncomputed: {}\n",
            output.hits(),
            output.computed()
        );
        for entry in &output.resolved {
            out.push_str(&format!(
                "{} ({}): {}\n",
                entry.keyword,
                entry.source.as_str(),
                format_vector(entry.vector.as_slice())
            ));
        }
        out
    };

    Ok(CliOutput {
        stdout,
        stderr,
        exit_code: ExitCode::Ok,
    })
}
