//! # Storage Telemetry
//!
//! Logging setup shared by every storage bus binary and test harness.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storage_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SB_SERVICE_NAME` | `storage-bus` | Service name on every record |
//! | `SB_LOG_LEVEL` / `RUST_LOG` | `info` | Level or `EnvFilter` directives |
//! | `SB_JSON_LOGS` | `false` | JSON records (defaults on in containers) |
//! | `SB_LOG_ANSI` | `true` | Colorized console output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, StructuredLogger};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("service_name cannot be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: service_name cannot be empty"
        );
    }
}
