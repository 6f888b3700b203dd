//! CLI command handlers.

pub mod add;
pub mod complete;
pub mod config;
pub mod get;
pub mod resolve;
pub mod stats;

pub use add::run_add;
pub use complete::{CompleteCommandInput, run_complete};
pub use config::run_config_show;
pub use get::run_get;
pub use resolve::run_resolve;
pub use stats::run_stats;

/// Render vector components for text output.
fn format_vector(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
