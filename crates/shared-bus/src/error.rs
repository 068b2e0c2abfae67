//! Error types for the event service.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventServiceError {
    #[error("Event service is not running")]
    NotInitialized,

    #[error("Event service has already been started")]
    AlreadyStarted,

    #[error("Invalid event service configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn dispatch thread: {0}")]
    ThreadSpawn(String),

    #[error("Dispatch thread panicked")]
    WorkerPanicked,
}
