//! Logging system setup.
//!
//! `RUST_LOG` takes precedence over the configured level when it is set.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber.
///
/// # Arguments
///
/// * `level` - Level used when `RUST_LOG` is unset (e.g. "info")
/// * `json_format` - Emit one JSON object per event instead of human-readable lines
pub fn setup_logging(level: &str, json_format: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install logger: {e}"))
}
