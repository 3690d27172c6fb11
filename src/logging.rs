//! Structured logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber. `level` is used as the
/// default filter directive when `RUST_LOG` is not set (e.g. `"info"`).
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
