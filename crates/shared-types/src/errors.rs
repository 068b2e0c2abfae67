//! # Error Types
//!
//! Conversion errors for the shared wire enums.

use thiserror::Error;

/// A raw value that does not name any variant of a shared enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Unknown packet priority: {0}")]
    UnknownPriority(u8),

    #[error("Unknown block edge geometry: {0}")]
    UnknownGeometry(u32),

    #[error("Unknown control code: 0x{0:08x}")]
    UnknownControlCode(u32),
}
