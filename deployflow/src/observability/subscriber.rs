//! Global `tracing` subscriber setup.

use crate::config::LoggingSettings;
use crate::errors::{ConfigurationError, DeployflowError};
use tracing_subscriber::EnvFilter;

/// Builds the filter for the given settings.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn build_env_filter(settings: &LoggingSettings) -> Result<EnvFilter, ConfigurationError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&settings.level).map_err(|e| {
        ConfigurationError::new(format!("invalid log filter: {e}"))
            .with_context_entry("level", settings.level.clone())
    })
}

/// Installs the global subscriber.
///
/// Embedders that install their own subscriber should skip this. Calling it
/// twice returns an error rather than panicking.
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), DeployflowError> {
    let filter = build_env_filter(settings)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if settings.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| DeployflowError::Internal(format!("failed to install subscriber: {e}")))
}
