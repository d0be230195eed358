// src/utils/log.rs

//! Tracing subscriber setup shared by the binaries.

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::models::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Log a summary section, one event per item.
pub fn summary(title: &str, items: &[(&str, String)]) {
    info!("[SUMMARY] {title}");
    for (key, value) in items {
        info!("    {key}: {value}");
    }
}
