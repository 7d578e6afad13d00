//! # ODR Telemetry
//!
//! Logging bootstrap for the Light ODR subsystem.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use odr_telemetry::{init_logging, LogConfig};
//!
//! fn main() {
//!     let config = LogConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QC_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter directives |
//! | `QC_JSON_LOGS` | `true` in containers | JSON output |
//! | `QC_LOG_TARGETS` | `false` | Include module targets |
//! | `OTEL_SERVICE_NAME` | `qc-18-light-odr` | Service name field |

#![warn(missing_docs)]

mod config;
mod logging;

pub use config::LogConfig;
pub use logging::{init_logging, init_test_logging};

use thiserror::Error;

/// Logging initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The filter directives could not be parsed.
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter {
        /// Directive string as configured.
        filter: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Filter {
            filter: "=".into(),
            reason: "bad".into(),
        };
        assert!(err.to_string().contains("Invalid log filter"));
    }
}
