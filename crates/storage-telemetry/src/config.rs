//! Telemetry configuration from environment variables.

use serde::{Deserialize, Serialize};
use std::env;

use crate::TelemetryError;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name stamped on every record
    pub service_name: String,

    /// Log filter: a bare level or a full `EnvFilter` directive string
    pub log_level: String,

    /// Emit JSON records instead of human-readable lines
    pub json_logs: bool,

    /// Colorize human-readable output
    pub ansi: bool,

    /// Include the emitting thread name (the event dispatcher names its thread)
    pub thread_names: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "storage-bus".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            ansi: true,
            thread_names: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SB_SERVICE_NAME`: Service name (default: storage-bus)
    /// - `SB_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `SB_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `SB_LOG_ANSI`: Colorize console output (default: true)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("SB_SERVICE_NAME")
                .unwrap_or_else(|_| "storage-bus".to_string()),

            log_level: env::var("SB_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("SB_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            ansi: env::var("SB_LOG_ANSI")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            thread_names: true,
        }
    }

    /// Configuration for a named component, e.g. `("01", "block-transport")`.
    pub fn for_component(id: &str, name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = format!("sb-{id}-{name}");
        config
    }

    /// Reject empty names and bare levels that are not real levels.
    ///
    /// Directive strings (containing `=` or `,`) are left to `EnvFilter`.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.service_name.is_empty() {
            return Err(TelemetryError::Config(
                "service_name cannot be empty".to_string(),
            ));
        }

        let level = self.log_level.trim().to_lowercase();
        let is_directive = level.contains('=') || level.contains(',');
        if !is_directive && !LEVELS.contains(&level.as_str()) {
            return Err(TelemetryError::Config(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}
