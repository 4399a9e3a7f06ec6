//! Logging initialization and configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "opsguard=info";

fn filter_for(level: Option<&str>) -> EnvFilter {
    match level {
        // A bare level applies to this crate and tower-http's request traces.
        Some(level) if !level.contains('=') && !level.contains(',') => {
            EnvFilter::try_new(format!("opsguard={level},tower_http={level}"))
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        Some(directives) => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}

/// Initialize the logging system.
///
/// Uses the `RUST_LOG` environment variable for filtering. If not set,
/// defaults to `opsguard=info`.
///
/// # Panics
///
/// Panics if called more than once, or if another tracing subscriber
/// has already been set.
pub fn init() {
    tracing_subscriber::registry()
        .with(filter_for(None))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Initialize the logging system with a configured level or directive string.
///
/// Returns `Err` if logging has already been initialized.
pub fn init_with_level(level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter_for(Some(level)))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter_for(None))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}
