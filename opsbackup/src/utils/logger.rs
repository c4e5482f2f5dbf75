//! Logging setup.
//!
//! Cron captures stdout/stderr into mail or log files, so the format
//! stays single-line and the level is overridable per invocation with
//! `RUST_LOG` without touching the config file.

use tracing_subscriber::EnvFilter;

/// Initialize logging; `default_level` applies when `RUST_LOG` is unset.
pub fn init(default_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}
