//! Logging configuration from environment variables.

use std::env;

/// Configuration for the log subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Service name attached to every event.
    pub service_name: String,

    /// Filter directives (trace, debug, info, `qc_18_light_odr=debug`, ...).
    pub log_level: String,

    /// Emit one JSON object per event instead of human-readable lines.
    pub json_logs: bool,

    /// Include the module target in each event.
    pub with_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "qc-18-light-odr".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            with_targets: false,
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables.
    ///
    /// JSON output defaults to on when running inside a container.
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "qc-18-light-odr".to_string()),

            log_level: env::var("QC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("QC_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            with_targets: env::var("QC_LOG_TARGETS")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    /// Verbose human-readable output for local debugging.
    pub fn for_debugging() -> Self {
        Self {
            log_level: "qc_18_light_odr=debug,info".to_string(),
            with_targets: true,
            ..Self::default()
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
