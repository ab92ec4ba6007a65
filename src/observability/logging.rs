//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` (where `RUST_LOG`
//! takes precedence over the configured level) and a `fmt` layer writing JSON
//! or human-readable lines.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::{LogFormat, LoggingConfig};

/// Build the level filter: `RUST_LOG` if set, the configured level otherwise
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. A second call keeps the first subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let filter = env_filter(config);
    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init(),
    };
    match result {
        Ok(()) => info!(level = %config.level, format = ?config.format, "LOGGING:INITIALIZED"),
        Err(_) => warn!("Tracing subscriber already initialized, skipping initialization"),
    }
}
