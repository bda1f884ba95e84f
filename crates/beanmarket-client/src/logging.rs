//! Log output setup

use beanmarket_core::{ConfigError, LoggingConfig};
use tracing_subscriber::EnvFilter;

use crate::errors::{ClientError, Result};

/// Install a `fmt` subscriber
///
/// `RUST_LOG` takes precedence over the configured filter. Returns `false`
/// when a global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            ClientError::Config(ConfigError::InvalidValue {
                field: "logging.filter".to_string(),
                reason: e.to_string(),
            })
        })?,
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter = config.filter.as_str(), "Logging initialized");
    }
    Ok(installed)
}
