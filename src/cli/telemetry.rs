//! Tracing subscriber setup for the CLI.
//!
//! Verbosity comes from the counted `-v` flag (or `HIVE_LOG_LEVEL`); the
//! `RUST_LOG` env filter still wins when set, so per-module overrides work
//! without recompiling. `HIVE_LOG_FORMAT=json` switches to JSON output for
//! log shippers.

use anyhow::{Context, Result};
use std::env;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// # Errors
/// Returns an error if a subscriber is already installed.
pub fn init(level: Option<Level>) -> Result<()> {
    let default_directive = level.map_or_else(|| "error".to_string(), |level| level.to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = env::var("HIVE_LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .context("failed to install JSON tracing subscriber")?;
    } else {
        registry
            .with(fmt::layer())
            .try_init()
            .context("failed to install tracing subscriber")?;
    }

    Ok(())
}
