//! Subscriber installation.
//!
//! Human-readable output for development, JSON for log shippers. Both
//! honour the same `EnvFilter` directives.

use tracing_subscriber::EnvFilter;

use crate::{LogConfig, TelemetryError};

fn build_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives).map_err(|e| TelemetryError::Filter {
        filter: directives.to_string(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber described by `config`.
///
/// Fails if the filter does not parse or a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(&config.log_level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_targets);

    let result = if config.json_logs {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.compact().try_init()
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json = config.json_logs,
        "[qc-18] Logging initialized"
    );
    Ok(())
}

/// Route logs to the test harness. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
