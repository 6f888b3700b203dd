//! Get command handler.

use super::format_vector;
use crate::error::{CliError, ExitCode};
use crate::format::{OutputMode, pretty_json};
use crate::{CliOutput, format_error_output, wiring};
use kwcache_ports::EmbeddingVector;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Run the get command.
pub fn run_get(
    mode: OutputMode,
    config_path: Option<&Path>,
    keywords: &[String],
) -> Result<CliOutput, CliError> {
    let found = wiring::load(config_path).and_then(|loaded| {
        wiring::with_store(&loaded.config, |store| Ok(store.get(keywords)?))
    });
    match found {
        Ok(found) => format_get_output(mode, keywords, &found),
        Err(error) => Ok(format_error_output(mode, &error)),
    }
}

fn format_get_output(
    mode: OutputMode,
    keywords: &[String],
    found: &BTreeMap<String, EmbeddingVector>,
) -> Result<CliOutput, CliError> {
    let mut seen = BTreeSet::new();
    let missing: Vec<&str> = keywords
        .iter()
        .map(String::as_str)
        .filter(|keyword| !found.contains_key(*keyword) && seen.insert(*keyword))
        .collect();

    let stdout = if mode.is_json() {
        let found: serde_json::Map<String, serde_json::Value> = found
            .iter()
            .map(|(keyword, vector)| (keyword.clone(), serde_json::json!(vector.as_slice())))
            .collect();
        pretty_json(&serde_json::json!({
            "status": "ok",
            "found": found,
            "missing": missing,
        }))?
    } else {
        let mut out = format!("status: ok\nfound: {}\n", found.len());
        for (keyword, vector) in found {
            out.push_str(&format!("{keyword}: {}\n", format_vector(vector.as_slice())));
        }
        if !missing.is_empty() {
            out.push_str(&format!("missing: {}\n", missing.join(", ")));
        }
        out
    };

    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code: ExitCode::Ok,
    })
}
