//! # Logging
//!
//! `tracing` subscriber setup. Logs go to stderr so stdout carries only the
//! command's report.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "deploy_reconciler=info,deployctl=info";

/// Install the global subscriber
///
/// `RUST_LOG` overrides the default filter. `log_format` is `json` or `text`.
///
/// # Errors
/// Returns an error if a global subscriber is already installed
pub fn init_tracing(log_format: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if log_format.eq_ignore_ascii_case("json") {
        builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
    } else {
        builder
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
    }
}
