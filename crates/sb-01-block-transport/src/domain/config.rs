//! Transport server configuration
//!
//! # Example
//!
//! ```ignore
//! use sb_01_block_transport::domain::TransportServerConfig;
//!
//! let config = TransportServerConfig::new(0x10_0000)
//!     .with_outstanding_io_max(32)
//!     .with_io_throttle_max(4096);
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};
use shared_types::{BlockCount, Lba};
use std::env;

use crate::error::TransportError;

/// Settings a transport server is created with.
///
/// Every ceiling may be zero, which disables that check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportServerConfig {
    /// Exported capacity in blocks
    pub capacity: BlockCount,
    /// First block handed out by placement
    pub default_offset: Lba,
    /// Maximum dispatched and not yet completed packets
    pub outstanding_io_max: u32,
    /// Maximum summed throttle cost in flight
    pub io_throttle_max: u64,
    /// Maximum summed credit cost in flight
    pub io_credits_max: u32,
    /// Extra NORMAL credits per round while the degraded queue ratio is on
    pub queue_ratio_addend: u32,
    /// Start with the degraded queue ratio on
    pub degraded_queue_ratio: bool,
    /// Flag the server's packets as subject to the stack limit
    pub stack_limit: bool,
    pub tags_enabled: bool,
}

impl Default for TransportServerConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            default_offset: 0,
            outstanding_io_max: 0,
            io_throttle_max: 0,
            io_credits_max: 0,
            queue_ratio_addend: 0,
            degraded_queue_ratio: false,
            stack_limit: false,
            tags_enabled: false,
        }
    }
}

impl TransportServerConfig {
    #[must_use]
    pub fn new(capacity: BlockCount) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Defaults overridden from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `SB_OUTSTANDING_IO_MAX`: outstanding ceiling (default: 0, unlimited)
    /// - `SB_IO_THROTTLE_MAX`: throttle ceiling (default: 0, unlimited)
    /// - `SB_IO_CREDITS_MAX`: credit ceiling (default: 0, unlimited)
    /// - `SB_QUEUE_RATIO_ADDEND`: NORMAL addend for the degraded ratio (default: 0)
    pub fn from_env(capacity: BlockCount) -> Self {
        let defaults = Self::new(capacity);
        Self {
            outstanding_io_max: env_or("SB_OUTSTANDING_IO_MAX", defaults.outstanding_io_max),
            io_throttle_max: env_or("SB_IO_THROTTLE_MAX", defaults.io_throttle_max),
            io_credits_max: env_or("SB_IO_CREDITS_MAX", defaults.io_credits_max),
            queue_ratio_addend: env_or("SB_QUEUE_RATIO_ADDEND", defaults.queue_ratio_addend),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.capacity == 0 {
            return Err(TransportError::InvalidConfig(
                "capacity cannot be 0".to_string(),
            ));
        }
        if self.default_offset >= self.capacity {
            return Err(TransportError::InvalidConfig(format!(
                "default_offset {} beyond capacity {}",
                self.default_offset, self.capacity
            )));
        }
        if self.io_throttle_max == 1 || self.io_credits_max == 1 {
            // Costs are clamped to max - 1, so a ceiling of one admits nothing.
            return Err(TransportError::InvalidConfig(
                "throttle and credit ceilings must be 0 or at least 2".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_default_offset(mut self, offset: Lba) -> Self {
        self.default_offset = offset;
        self
    }

    pub fn with_outstanding_io_max(mut self, max: u32) -> Self {
        self.outstanding_io_max = max;
        self
    }

    pub fn with_io_throttle_max(mut self, max: u64) -> Self {
        self.io_throttle_max = max;
        self
    }

    pub fn with_io_credits_max(mut self, max: u32) -> Self {
        self.io_credits_max = max;
        self
    }

    pub fn with_degraded_queue_ratio(mut self, addend: u32) -> Self {
        self.degraded_queue_ratio = true;
        self.queue_ratio_addend = addend;
        self
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
