//! Bit sets and small enums describing edges and servers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

macro_rules! flag_set {
    ($name:ident) => {
        impl $name {
            pub const NONE: $name = $name(0);

            #[must_use]
            pub fn bits(self) -> u32 {
                self.0
            }

            /// All bits of `other` are set.
            #[must_use]
            pub fn contains(self, other: $name) -> bool {
                other.0 != 0 && self.0 & other.0 == other.0
            }

            /// At least one bit of `other` is set.
            #[must_use]
            pub fn intersects(self, other: $name) -> bool {
                self.0 & other.0 != 0
            }

            #[must_use]
            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }

        impl Not for $name {
            type Output = $name;
            fn not(self) -> $name {
                $name(!self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:x}", self.0)
            }
        }
    };
}

// =============================================================================
// PATH ATTRIBUTES
// =============================================================================

/// Attribute bits carried on a block edge, raised by the server side and
/// read by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PathAttributes(pub u32);

flag_set!(PathAttributes);

impl PathAttributes {
    pub const END_OF_LIFE: PathAttributes = PathAttributes(0x1);
    pub const CLIENT_IS_HIBERNATING: PathAttributes = PathAttributes(0x2);
    pub const CALL_HOME_END_OF_LIFE: PathAttributes = PathAttributes(0x4);
    pub const CALL_HOME_KILL: PathAttributes = PathAttributes(0x8);
    pub const CHECK_QUEUED_IO_TIMER: PathAttributes = PathAttributes(0x10);
    pub const TIMEOUT_ERRORS: PathAttributes = PathAttributes(0x20);
    pub const HAS_BEEN_WRITTEN: PathAttributes = PathAttributes(0x40);
    pub const DEGRADED: PathAttributes = PathAttributes(0x80);
    pub const PATH_NOT_PREFERRED: PathAttributes = PathAttributes(0x100);
    pub const CLIENT_IS_READY_TO_HIBERNATE: PathAttributes = PathAttributes(0x200);
    pub const CLIENT_CAN_SAVE_POWER: PathAttributes = PathAttributes(0x400);
    pub const CLIENT_DOWNLOAD_REQ: PathAttributes = PathAttributes(0x800);
    pub const CLIENT_DOWNLOAD_GRANT: PathAttributes = PathAttributes(0x1000);
    pub const CLIENT_DOWNLOAD_REQ_FAST_DL: PathAttributes = PathAttributes(0x2000);
    pub const CLIENT_DOWNLOAD_REQ_TRIAL_RUN: PathAttributes = PathAttributes(0x4000);
    pub const LINK_FAULT: PathAttributes = PathAttributes(0x8000);
    pub const DRIVE_FAULT: PathAttributes = PathAttributes(0x10000);
    pub const CLEAR_DRIVE_FAULT_PENDING: PathAttributes = PathAttributes(0x20000);
    pub const HEALTH_CHECK_REQUEST: PathAttributes = PathAttributes(0x40000);
    /// The client addresses the edge as if its offset were zero.
    pub const CLIENT_IGNORE_OFFSET: PathAttributes = PathAttributes(0x80000);
    pub const DEGRADED_NEEDS_REBUILD: PathAttributes = PathAttributes(0x100000);
    pub const KEYS_REQUIRED: PathAttributes = PathAttributes(0x200000);
    pub const WEAR_LEVEL_REQUIRED: PathAttributes = PathAttributes(0x400000);

    /// Every bit of the firmware download handshake.
    pub const DOWNLOAD_MASK: PathAttributes = PathAttributes(0x800 | 0x1000 | 0x2000 | 0x4000);

    pub const FAULT_MASK: PathAttributes = PathAttributes(0x8000 | 0x10000 | 0x20000);

    /// Replace the bits under `mask` with the corresponding bits of `value`.
    #[must_use]
    pub fn with_masked(self, value: PathAttributes, mask: PathAttributes) -> PathAttributes {
        PathAttributes((self.0 & !mask.0) | (value.0 & mask.0))
    }

    #[must_use]
    pub fn is_download_in_progress(self) -> bool {
        self.intersects(Self::DOWNLOAD_MASK)
    }

    #[must_use]
    pub fn ignores_offset(self) -> bool {
        self.contains(Self::CLIENT_IGNORE_OFFSET)
    }
}

// =============================================================================
// SERVER FLAGS
// =============================================================================

/// State and behaviour bits of a transport server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ServerFlags(pub u32);

flag_set!(ServerFlags);

impl ServerFlags {
    pub const HOLD: ServerFlags = ServerFlags(0x1);
    pub const TAGS_ENABLED: ServerFlags = ServerFlags(0x2);
    pub const FLUSH_AND_BLOCK: ServerFlags = ServerFlags(0x4);
    pub const IO_IN_PROGRESS: ServerFlags = ServerFlags(0x10);
    pub const COMPLETE_EVENTS_ON_DESTROY: ServerFlags = ServerFlags(0x20);
    pub const EVENT_ON_SW_ERROR: ServerFlags = ServerFlags(0x40);
    pub const FORCE_COMPLETION: ServerFlags = ServerFlags(0x10000);
    pub const STACK_LIMIT: ServerFlags = ServerFlags(0x20000);
    pub const DEGRADED_QUEUE_RATIO: ServerFlags = ServerFlags(0x40000);

    /// Flags that close the gate while set.
    pub const GATING: ServerFlags = ServerFlags(0x1 | 0x4 | 0x10000);

    #[must_use]
    pub fn is_gated(self) -> bool {
        self.intersects(Self::GATING)
    }
}

// =============================================================================
// LOGICAL DRIVE REPORTING
// =============================================================================

/// Health of the logical drive behind an edge, as reported upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogicalDriveState {
    #[default]
    Uninitialized,
    Online,
    FailedEol,
    FailedLinkFault,
    FailedDriveFault,
    FailedNonEq,
    FailedInvalidIdentity,
    FailedSsdLe,
    FailedSsdRi,
    FailedHdd520,
    FailedLess12gLink,
    FailedOther,
}

impl LogicalDriveState {
    #[must_use]
    pub fn is_failed(self) -> bool {
        !matches!(
            self,
            LogicalDriveState::Uninitialized | LogicalDriveState::Online
        )
    }
}

/// Class of media error reported by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalErrorType {
    UnexpectedCrcMultiBits,
    UnexpectedCrcSingleBit,
    UnexpectedCrc,
    Timeout,
}

/// Per-server counters of reported logical errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogicalErrorCounts {
    pub crc_multi_bit: u32,
    pub crc_single_bit: u32,
    pub crc: u32,
    pub timeout: u32,
}

impl LogicalErrorCounts {
    pub fn record(&mut self, error: LogicalErrorType) {
        let slot = match error {
            LogicalErrorType::UnexpectedCrcMultiBits => &mut self.crc_multi_bit,
            LogicalErrorType::UnexpectedCrcSingleBit => &mut self.crc_single_bit,
            LogicalErrorType::UnexpectedCrc => &mut self.crc,
            LogicalErrorType::Timeout => &mut self.timeout,
        };
        *slot = slot.saturating_add(1);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        u64::from(self.crc_multi_bit)
            + u64::from(self.crc_single_bit)
            + u64::from(self.crc)
            + u64::from(self.timeout)
    }
}

/// Reported by a client that has entered hibernation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HibernationInfo {
    /// Longest wake-up latency the client can tolerate.
    pub max_latency_time_in_sec: u64,
    /// Whether the client hibernates on the active storage processor.
    pub active_side: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_update_keeps_unrelated_bits() {
        let attrs = PathAttributes::END_OF_LIFE | PathAttributes::LINK_FAULT;
        let updated = attrs.with_masked(PathAttributes::DRIVE_FAULT, PathAttributes::FAULT_MASK);
        assert!(updated.contains(PathAttributes::END_OF_LIFE));
        assert!(updated.contains(PathAttributes::DRIVE_FAULT));
        assert!(!updated.contains(PathAttributes::LINK_FAULT));
    }

    #[test]
    fn test_insert_remove() {
        let mut attrs = PathAttributes::NONE;
        attrs.insert(PathAttributes::CLIENT_DOWNLOAD_REQ);
        assert!(attrs.is_download_in_progress());
        attrs.remove(PathAttributes::CLIENT_DOWNLOAD_REQ);
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_gating_flags() {
        assert!(ServerFlags::HOLD.is_gated());
        assert!(ServerFlags::FLUSH_AND_BLOCK.is_gated());
        assert!(ServerFlags::FORCE_COMPLETION.is_gated());
        assert!(!(ServerFlags::TAGS_ENABLED | ServerFlags::STACK_LIMIT).is_gated());
    }

    #[test]
    fn test_contains_empty_is_false() {
        assert!(!ServerFlags::HOLD.contains(ServerFlags::NONE));
    }

    #[test]
    fn test_logical_error_counts() {
        let mut counts = LogicalErrorCounts::default();
        counts.record(LogicalErrorType::Timeout);
        counts.record(LogicalErrorType::Timeout);
        counts.record(LogicalErrorType::UnexpectedCrc);
        assert_eq!(counts.timeout, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_drive_state_failure() {
        assert!(LogicalDriveState::FailedLinkFault.is_failed());
        assert!(!LogicalDriveState::Online.is_failed());
    }
}
