//! Add command handler.
//!
//! Entries are read as JSON, either a list of
//! `{"keyword": "...", "dtype": "float32", "values": [...]}` objects or a
//! `{"keyword": [...]}` map of `float32` vectors.

use crate::error::{CliError, ExitCode};
use crate::format::{OutputMode, pretty_json};
use crate::{CliOutput, format_error_output, log_info, read_input, wiring};
use kwcache_ports::{ElementType, EmbeddingArray, InsertSummary, KeywordEntry};
use kwcache_shared::{ErrorCode, ErrorEnvelope, Result};
use serde::Deserialize;
use serde_json::{Value, from_value};
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EntryDto {
    keyword: String,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(alias = "embedding")]
    values: Value,
}

/// Run the add command.
pub fn run_add(
    mode: OutputMode,
    config_path: Option<&Path>,
    file: Option<&Path>,
) -> Result<CliOutput, CliError> {
    let text = read_input(file)?;
    let outcome = parse_entries(&text).and_then(|entries| {
        let loaded = wiring::load(config_path)?;
        wiring::with_store(&loaded.config, |store| Ok(store.add(&entries)?))
    });

    match outcome {
        Ok(summary) => format_add_output(mode, summary),
        Err(error) => Ok(format_error_output(mode, &error)),
    }
}

fn parse_entries(text: &str) -> Result<Vec<KeywordEntry>> {
    let document: Value = serde_json::from_str(text)
        .map_err(|error| invalid_entries(format!("entries are not valid JSON: {error}")))?;

    match document {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let dto: EntryDto = serde_json::from_value(item).map_err(|error| {
                    invalid_entries(format!("entry {index} is malformed: {error}"))
                })?;
                entry_from_dto(dto)
            })
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .map(|(keyword, values)| {
                entry_from_dto(EntryDto {
                    keyword,
                    dtype: None,
                    values,
                })
            })
            .collect(),
        _ => Err(invalid_entries(
            "entries must be a JSON array of objects or a keyword map".to_string(),
        )),
    }
}

fn entry_from_dto(dto: EntryDto) -> Result<KeywordEntry> {
    let dtype = match dto.dtype.as_deref() {
        None => ElementType::Float32,
        Some(name) => ElementType::parse(name).ok_or_else(|| {
            invalid_entries(format!("unknown dtype `{name}` for keyword `{}`", dto.keyword))
        })?,
    };

    let keyword = dto.keyword;
    let not_numbers = |error: serde_json::Error| {
        invalid_entries(format!(
            "values for keyword `{keyword}` are not {dtype} numbers: {error}"
        ))
    };
    let values = dto.values;
    let embedding = match dtype {
        ElementType::Float32 => {
            let wide = from_value::<Vec<f64>>(values).map_err(not_numbers)?;
            EmbeddingArray::from(narrow_to_f32(&keyword, &wide)?)
        },
        ElementType::Float64 => from_value::<Vec<f64>>(values)
            .map(EmbeddingArray::from)
            .map_err(not_numbers)?,
        ElementType::Int32 => from_value::<Vec<i32>>(values)
            .map(EmbeddingArray::from)
            .map_err(not_numbers)?,
        ElementType::Int64 => from_value::<Vec<i64>>(values)
            .map(EmbeddingArray::from)
            .map_err(not_numbers)?,
    };

    Ok(KeywordEntry::new(keyword, embedding))
}

/// Narrow JSON numbers to `f32`, refusing values outside the `f32` range.
#[allow(clippy::cast_possible_truncation)]
fn narrow_to_f32(keyword: &str, wide: &[f64]) -> Result<Vec<f32>> {
    wide.iter()
        .enumerate()
        .map(|(index, &value)| {
            let narrow = value as f32;
            if value.is_finite() && !narrow.is_finite() {
                return Err(invalid_entries(format!(
                    "value {value} at index {index} for keyword `{keyword}` is out of float32 range"
                )));
            }
            Ok(narrow)
        })
        .collect()
}

fn invalid_entries(message: String) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::invalid_input(), message)
}

fn format_add_output(mode: OutputMode, summary: InsertSummary) -> Result<CliOutput, CliError> {
    let mut stderr = String::new();
    log_info(
        &mut stderr,
        &format!("stored {} of {} entries", summary.inserted, summary.total()),
        mode.no_progress,
    );

    let stdout = if mode.is_json() {
        pretty_json(&serde_json::json!({
            "status": "ok",
            "inserted": summary.inserted,
            "skipped": summary.skipped,
        }))?
    } else {
        format!(
            "status: ok\ninserted: {}\nskipped: {}\n",
            summary.inserted, summary.skipped
        )
    };

    Ok(CliOutput {
        stdout,
        stderr,
        exit_code: ExitCode::Ok,
    })
}
