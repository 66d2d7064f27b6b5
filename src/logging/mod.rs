//! Logging setup for the worker
//!
//! Production emits one JSON object per event for log aggregation; every
//! other environment gets coloured human-readable lines.

use crate::config::get_environment;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. Driver crates are noisy at debug.
const DEFAULT_FILTER: &str = "info,tokio_postgres=warn,redis=warn";

pub fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

/// Install the global subscriber for the current `APP_ENV`.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = if is_production(&get_environment()) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stdout),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_ansi(true)
                    .with_writer(std::io::stdout),
            )
            .try_init()
    };

    if let Err(e) = installed {
        tracing::debug!(error = %e, "logging already initialised");
    }
}
