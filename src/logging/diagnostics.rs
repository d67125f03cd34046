//! Diagnostic side channel
//!
//! The engine never reports failures to its callers; it emits `tracing`
//! events instead. This installs a subscriber that prints them to stderr.

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_DIAGNOSTICS_FILTER: &str = "daylog=info";

/// Install the global diagnostics subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_diagnostics() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_DIAGNOSTICS_FILTER.into());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install diagnostics subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_DIAGNOSTICS_FILTER).is_ok());
    }
}
