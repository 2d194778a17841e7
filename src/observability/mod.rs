//! Structured logging initialization.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber from logging configuration.
///
/// `RUST_LOG` wins over the configured filter when set. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let fallback = config
        .filter
        .clone()
        .unwrap_or_else(|| format!("orbit_intent={}", config.level));
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already initialized");
    }
}
