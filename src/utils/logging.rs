//! Structured logging initialization.
//!
//! Thin wrapper over `tracing-subscriber` driven by [`LoggingConfig`].
//! Initialization is idempotent: a second call is a no-op rather than an
//! error, so embedding applications that already installed a subscriber
//! keep theirs.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a global tracing subscriber from the logging configuration.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed, keeping existing one");
    }
}
