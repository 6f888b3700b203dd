//! # kwcache-ports
//!
//! Boundary contracts between the kwcache use cases and their adapters.
//! This crate depends only on `kwcache-shared`.

use std::future::Future;
use std::pin::Pin;

/// Boxed future used by async port traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod completion;
pub mod embedding;
pub mod logger;
pub mod store;

pub use completion::*;
pub use embedding::*;
pub use logger::*;
pub use store::*;

#[cfg(test)]
mod tests {
    fn workspace_deps() -> Vec<String> {
        let cargo_toml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let mut deps = Vec::new();
        let mut in_deps = false;

        for raw_line in cargo_toml.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_deps = line == "[dependencies]" || line == "[dev-dependencies]";
                continue;
            }
            if in_deps && line.starts_with("kwcache-") {
                let key = line.split('=').next().unwrap_or("").trim();
                deps.push(key.split('.').next().unwrap_or("").trim().to_string());
            }
        }

        deps
    }

    #[test]
    fn ports_depends_only_on_shared() {
        assert_eq!(workspace_deps(), vec!["kwcache-shared".to_string()]);
    }
}
