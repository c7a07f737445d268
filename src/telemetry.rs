//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Build the log filter for a default level
///
/// `RUST_LOG` wins when it is set and parses.
pub fn filter_for(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("slotmeter={}", default_level)))
}

/// Initialize tracing subscriber for structured logging
///
/// This can only be called once per process. Subsequent calls are silently
/// ignored, which matters when a host embeds the library and may already
/// have installed its own subscriber.
///
/// # Examples
///
/// ```no_run
/// slotmeter::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let result = tracing_subscriber::registry()
            .with(filter_for(default_level))
            .with(tracing_subscriber::fmt::layer())
            .try_init();

        if result.is_err() {
            tracing::debug!("Global subscriber already installed, keeping it");
        }
    });
}
