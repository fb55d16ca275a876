//! Structured logging initialization.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize `tracing` with an env-filter and a compact fmt layer.
///
/// `verbose` bumps the default filter one notch when `RUST_LOG` isn't set;
/// an explicit `RUST_LOG` always wins.
pub fn init(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "debug,relay_broker=trace,relay_worker=trace" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
