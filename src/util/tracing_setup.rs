//! Tracing/logging initialization

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber from the `[logging]` section
///
/// `RUST_LOG` overrides the configured level. Stage threads are named after
/// their stage, so thread names are included in every record.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid log level: {}", config.level))?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format.as_str() {
        "json" => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(false),
            )
            .try_init(),
        "pretty" => registry
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .try_init(),
        other => anyhow::bail!("Unknown log format: {other}"),
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}
