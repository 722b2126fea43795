//! Tracing subscriber setup.

use memstream_core::config::GeneralConfig;
use memstream_core::{MemstreamError, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `general.log_level`; `general.log_format = "json"`
/// switches to one JSON object per line.
///
/// # Errors
///
/// Returns `Config` if the level does not parse or a subscriber is already
/// installed.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            MemstreamError::Config(format!("bad log level '{}': {e}", config.log_level))
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| MemstreamError::Config(format!("failed to initialize tracing: {e}")))?;

    tracing::info!(level = %config.log_level, format = %config.log_format, "tracing initialized");
    Ok(())
}
