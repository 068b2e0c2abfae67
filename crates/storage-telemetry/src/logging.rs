//! Structured logging.
//!
//! Records carry consistent fields so JSON output can be indexed directly:
//! - `timestamp`, `level`, `target`, `threadName`
//! - `service`: service name from [`TelemetryConfig`]
//! - `server` / `edge` / `event`: ids attached by the bus crates

use tracing_subscriber::{fmt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Handle returned once logging is installed.
#[derive(Debug)]
pub struct StructuredLogger {
    installed: bool,
}

impl StructuredLogger {
    /// False when another subscriber was already installed.
    #[must_use]
    pub fn installed(&self) -> bool {
        self.installed
    }
}

pub(crate) fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(config.log_level.trim())
        .map_err(|e| TelemetryError::Filter(e.to_string()))
}

/// Install the global subscriber. Calling it again is harmless.
pub fn init_logging(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    config.validate()?;
    let filter = build_filter(config)?;

    let installed = if config.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_names(config.thread_names)
            .with_current_span(true)
            .try_init()
            .is_ok()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_ansi(config.ansi)
            .with_thread_names(config.thread_names)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(
            service = %config.service_name,
            json_logs = config.json_logs,
            "Structured logging initialized"
        );
    }

    Ok(StructuredLogger { installed })
}

/// Log an event about a transport server with standard fields.
#[macro_export]
macro_rules! log_server_event {
    ($level:ident, $server:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            server = %$server,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log an event about an edge with standard fields.
#[macro_export]
macro_rules! log_edge_event {
    ($level:ident, $server:expr, $edge:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            server = %$server,
            edge = %$edge,
            $($($field)*,)?
            $msg
        )
    };
}
