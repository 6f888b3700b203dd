//! Stats command handler.

use crate::error::{CliError, ExitCode};
use crate::format::{OutputMode, pretty_json};
use crate::{CliOutput, format_error_output, wiring};
use kwcache_adapters::store::SCHEMA_VERSION;
use kwcache_shared::Result;
use std::path::{Path, PathBuf};

struct StoreStats {
    path: PathBuf,
    entries: u64,
}

/// Run the stats command.
pub fn run_stats(mode: OutputMode, config_path: Option<&Path>) -> Result<CliOutput, CliError> {
    let stats = wiring::load(config_path).and_then(|loaded| {
        wiring::with_store(&loaded.config, |store| {
            Ok(StoreStats {
                path: store.path().to_path_buf(),
                entries: store.count()?,
            })
        })
    });

    match stats {
        Ok(stats) => format_stats_output(mode, &stats),
        Err(error) => Ok(format_error_output(mode, &error)),
    }
}

fn format_stats_output(mode: OutputMode, stats: &StoreStats) -> Result<CliOutput, CliError> {
    let path = stats.path.to_string_lossy();
    let stdout = if mode.is_json() {
        pretty_json(&serde_json::json!({
            "status": "ok",
            "path": path,
            "entries": stats.entries,
            "schemaVersion": SCHEMA_VERSION,
        }))?
    } else {
        format!(
            "status: ok\npath: {path}\nentries: {}\nschema: {SCHEMA_VERSION}\n",
            stats.entries
        )
    };

    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code: ExitCode::Ok,
    })
}
