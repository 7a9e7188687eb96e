//! Structured logging configuration.
//!
//! One subscriber for the whole process; `RUST_LOG` wins over the
//! configured level when set.

use crate::config::LoggingConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok();

    if installed {
        info!(app = %config.app_name, "Logging initialized");
    }
}
