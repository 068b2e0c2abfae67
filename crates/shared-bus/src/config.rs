//! Event service configuration.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::EventServiceError;
use crate::MAX_EVENT_QUEUE_DEPTH;

/// Tunables for [`EventService`](crate::EventService).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventServiceConfig {
    /// Run queue depth, counting the in-flight event (1 to 10,240)
    pub queue_depth: usize,
    /// Events kept on the pool free list
    pub pool_size: usize,
    /// Name given to the dispatch thread
    pub thread_name: String,
}

impl Default for EventServiceConfig {
    fn default() -> Self {
        Self {
            queue_depth: MAX_EVENT_QUEUE_DEPTH,
            pool_size: 256,
            thread_name: "sb-event-service".to_string(),
        }
    }
}

impl EventServiceConfig {
    /// Load from environment.
    ///
    /// # Environment Variables
    ///
    /// - `SB_EVENT_QUEUE_DEPTH`: run queue depth (default: 10240)
    /// - `SB_EVENT_POOL_SIZE`: pool free-list size (default: 256)
    /// - `SB_EVENT_THREAD_NAME`: dispatch thread name (default: sb-event-service)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_depth: env::var("SB_EVENT_QUEUE_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.queue_depth),

            pool_size: env::var("SB_EVENT_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_size),

            thread_name: env::var("SB_EVENT_THREAD_NAME").unwrap_or(defaults.thread_name),
        }
    }

    pub fn validate(&self) -> Result<(), EventServiceError> {
        if self.queue_depth == 0 || self.queue_depth > MAX_EVENT_QUEUE_DEPTH {
            return Err(EventServiceError::InvalidConfig(format!(
                "queue_depth must be between 1 and {MAX_EVENT_QUEUE_DEPTH}, got {}",
                self.queue_depth
            )));
        }

        if self.thread_name.is_empty() {
            return Err(EventServiceError::InvalidConfig(
                "thread_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
