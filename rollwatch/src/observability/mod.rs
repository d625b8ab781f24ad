//! Tracing setup and process-wide counters.

mod metrics;

pub use metrics::Metrics;

use crate::errors::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// `level` is a tracing env-filter directive (e.g. `info`,
/// `rollwatch=debug`); `RUST_LOG` takes precedence when set. Pass
/// `json = true` for machine-readable output.
pub fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::config(format!("bad log filter '{level}': {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // A second init (tests) is harmless.
    if let Err(e) = result {
        tracing::debug!("tracing already initialized: {e}");
    }
    Ok(())
}
