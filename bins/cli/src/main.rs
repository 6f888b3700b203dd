//! `kwcache` command-line entrypoint.

mod commands;
mod error;
mod format;
mod wiring;

use clap::{Parser, Subcommand};
use commands::{
    CompleteCommandInput, run_add, run_complete, run_config_show, run_get, run_resolve,
    run_stats,
};
use error::{CliError, ExitCode};
use format::{OutputArgs, OutputMode, pretty_json};
use kwcache_shared::ErrorEnvelope;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(
    name = "kwcache",
    version,
    about = "Persistent keyword to embedding cache",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    output: OutputArgs,

    /// Optional config file path (JSON/TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Look up stored embeddings.
    ///
    /// JSON has no NaN or infinity, so `--output json` prints those
    /// components as `null` and the result cannot be fed back into `add`.
    /// Text output keeps them as `NaN`, `inf` and `-inf`.
    Get {
        /// Keywords to look up.
        #[arg(value_name = "KEYWORD", required = true)]
        keywords: Vec<String>,
    },
    /// Insert embeddings from a JSON entries file. Stored keywords are kept.
    Add {
        /// Entries file. Reads stdin when omitted or `-`.
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Resolve embeddings, computing and caching the ones not stored yet.
    Resolve {
        /// Keywords to resolve.
        #[arg(value_name = "KEYWORD", required = true)]
        keywords: Vec<String>,
    },
    /// Run a single text completion.
    Complete {
        /// System instructions.
        #[arg(long, default_value = "")]
        instructions: String,
        /// User input. Reads stdin when omitted.
        #[arg(long)]
        input: Option<String>,
        /// Sampling temperature.
        #[arg(long, default_value_t = 0.0)]
        temperature: f32,
        /// Ask for a JSON object response.
        #[arg(long)]
        json_mode: bool,
    },
    /// Show store statistics.
    Stats,
    /// Config-related commands.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Show the effective config after env overrides.
    Show,
}

pub(crate) struct CliOutput {
    stdout: String,
    stderr: String,
    exit_code: ExitCode,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    wiring::init_tracing();
    let mode = OutputMode::from_args(&cli.output);

    match run(&cli, mode) {
        Ok(output) => match write_output(&output) {
            Ok(()) => std::process::ExitCode::from(output.exit_code.as_u8()),
            Err(error) => exit_with_error(&error),
        },
        Err(error) => exit_with_error(&error),
    }
}

fn exit_with_error(error: &CliError) -> std::process::ExitCode {
    let _ = writeln!(io::stderr(), "error: {error}");
    std::process::ExitCode::from(error.exit_code().as_u8())
}

fn run(cli: &Cli, mode: OutputMode) -> Result<CliOutput, CliError> {
    let config_path = cli.config.as_deref();
    match &cli.command {
        Commands::Get { keywords } => run_get(mode, config_path, keywords),
        Commands::Add { file } => run_add(mode, config_path, file.as_deref()),
        Commands::Resolve { keywords } => run_resolve(mode, config_path, keywords),
        Commands::Complete {
            instructions,
            input,
            temperature,
            json_mode,
        } => run_complete(
            mode,
            config_path,
            CompleteCommandInput {
                instructions: instructions.clone(),
                input: input.clone(),
                temperature: *temperature,
                json_mode: *json_mode,
            },
        ),
        Commands::Stats => run_stats(mode, config_path),
        Commands::Config {
            command: ConfigCommands::Show,
        } => run_config_show(mode, config_path),
    }
}

pub(crate) fn format_error_output(mode: OutputMode, error: &ErrorEnvelope) -> CliOutput {
    let error = error.clone().redact_secret_metadata();
    let exit_code = ExitCode::for_envelope(&error);

    let mut stderr = String::new();
    log_info(&mut stderr, "command failed", mode.no_progress);

    let stdout = if mode.is_json() {
        let payload = serde_json::json!({
            "status": "error",
            "error": {
                "code": error.code.to_string(),
                "message": error.message,
                "kind": error.kind.to_string(),
                "class": error.class.to_string(),
                "metadata": error.metadata,
            },
        });
        // This is a CLI boundary, so JSON serialization errors are internal.
        pretty_json(&payload).unwrap_or_else(|_| {
            "{\"status\":\"error\",\"error\":{\"code\":\"core:internal\",\"message\":\"internal error\",\"kind\":\"invariant\"}}\n".to_string()
        })
    } else {
        format_error_text(&error)
    };

    CliOutput {
        stdout,
        stderr,
        exit_code,
    }
}

fn format_error_text(error: &ErrorEnvelope) -> String {
    let mut out = format!(
        "status: error\ncode: {}\nkind: {}\nmessage: {}\n",
        error.code, error.kind, error.message
    );
    for (key, value) in &error.metadata {
        out.push_str("meta.");
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out
}

pub(crate) fn log_info(stderr: &mut String, message: &str, no_progress: bool) {
    if no_progress {
        return;
    }
    stderr.push_str("info: ");
    stderr.push_str(message);
    stderr.push('\n');
}

pub(crate) fn read_stdin() -> Result<String, CliError> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

pub(crate) fn read_input(path: Option<&Path>) -> Result<String, CliError> {
    match path {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => read_stdin(),
    }
}

fn write_output(output: &CliOutput) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    stdout.write_all(output.stdout.as_bytes())?;

    if !output.stderr.is_empty() {
        let mut stderr = io::stderr();
        stderr.write_all(output.stderr.as_bytes())?;
        stderr.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use clap::CommandFactory;
    use kwcache_shared::{ErrorClass, ErrorCode, REDACTED_VALUE};

    fn json_mode() -> OutputMode {
        OutputMode::from_args(&OutputArgs {
            output: Some(OutputFormat::Json),
            no_progress: true,
            json: false,
        })
    }

    #[test]
    fn version_flag_is_supported() {
        let result = Cli::command().try_get_matches_from(["kwcache", "--version"]);
        let is_version = matches!(
            result,
            Err(error) if error.kind() == clap::error::ErrorKind::DisplayVersion
        );

        assert!(is_version, "expected clap to render version");
    }

    #[test]
    fn cli_parses_complete_flags() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from([
            "kwcache",
            "complete",
            "--instructions",
            "Answer briefly.",
            "--input",
            "fruit?",
            "--temperature",
            "0.7",
            "--json-mode",
            "--output",
            "json",
        ])?;

        match cli.command {
            Commands::Complete {
                instructions,
                input,
                temperature,
                json_mode,
            } => {
                assert_eq!(instructions, "Answer briefly.");
                assert_eq!(input.as_deref(), Some("fruit?"));
                assert!((temperature - 0.7).abs() < f32::EPSILON);
                assert!(json_mode);
            },
            other => return Err(format!("unexpected command: {other:?}").into()),
        }
        assert_eq!(cli.output.output, Some(OutputFormat::Json));
        Ok(())
    }

    #[test]
    fn get_requires_keywords() {
        let result = Cli::try_parse_from(["kwcache", "get"]);
        assert!(result.is_err());
    }

    #[test]
    fn get_help_explains_non_finite_json_components() -> Result<(), Box<dyn std::error::Error>> {
        let mut command = Cli::command();
        let get = command
            .find_subcommand_mut("get")
            .ok_or("get subcommand missing")?;
        let help = get.render_long_help().to_string();
        assert!(help.contains("`null`"), "help: {help}");
        assert!(help.contains("cannot be fed back into `add`"), "help: {help}");
        Ok(())
    }

    #[test]
    fn global_config_flag_is_accepted_after_subcommand() -> Result<(), Box<dyn std::error::Error>>
    {
        let cli = Cli::try_parse_from(["kwcache", "stats", "--config", "kwcache.toml"])?;
        assert_eq!(cli.config.as_deref(), Some(Path::new("kwcache.toml")));
        Ok(())
    }

    #[test]
    fn error_formatting_redacts_sensitive_meta_keys() -> Result<(), Box<dyn std::error::Error>> {
        let error = ErrorEnvelope::unexpected(
            ErrorCode::permission_denied(),
            "request rejected",
            ErrorClass::NonRetriable,
        )
        .with_metadata("apiKey", "sk-live") // pragma: allowlist secret
        .with_metadata("status", "401");

        let output = format_error_output(json_mode(), &error);
        let value: serde_json::Value = serde_json::from_str(output.stdout.trim())?;
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["metadata"]["apiKey"], REDACTED_VALUE);
        assert_eq!(value["error"]["metadata"]["status"], "401");
        assert!(output.stderr.is_empty());
        Ok(())
    }

    #[test]
    fn text_errors_carry_code_and_metadata() {
        let error = ErrorEnvelope::expected(ErrorCode::new("store", "invalid_embedding"), "bad")
            .with_metadata("keyword", "apple");
        let text = format_error_text(&error);
        assert!(text.contains("code: store:invalid_embedding\n"));
        assert!(text.contains("meta.keyword: apple\n"));
    }

    #[test]
    fn log_info_respects_no_progress() {
        let mut stderr = String::new();
        log_info(&mut stderr, "hidden", true);
        assert!(stderr.is_empty());
        log_info(&mut stderr, "shown", false);
        assert_eq!(stderr, "info: shown\n");
    }
}
