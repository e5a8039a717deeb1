//! Structured logging setup.
//!
//! The library itself only emits `tracing` events. Applications (and tests)
//! that want them printed call [`init`] once with their [`LoggingConfig`];
//! `RUST_LOG` still wins over the configured level when set.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// Returns `false` if a global subscriber was already installed, which is
/// harmless and expected when several tests call this.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false);

    let installed = if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::debug!(app = %config.app_name, "Logging initialized");
    }
    installed
}
