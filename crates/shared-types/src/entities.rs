//! # Core Storage Entities
//!
//! Identifiers and addressing primitives shared by the block transport and the
//! event service.
//!
//! ## Clusters
//!
//! - **Addressing**: `Lba`, `BlockCount`, `LBA_INVALID`
//! - **Identity**: `ObjectId`, `ServerId`, `EdgeIndex`, `EdgeHandle`, `PackageId`
//! - **Priorities**: `PacketPriority`, `TrafficPriority`, `MedicActionPriority`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ValueError;

// =============================================================================
// CLUSTER A: ADDRESSING
// =============================================================================

/// Logical block address, in units of the exported block size of an edge.
pub type Lba = u64;

/// Number of blocks in an extent.
pub type BlockCount = u64;

/// Sentinel for "no address".
pub const LBA_INVALID: Lba = u64::MAX;

/// Size in bytes of one block.
pub type BlockSize = u32;

// =============================================================================
// CLUSTER B: IDENTITY
// =============================================================================

/// Identifier of a storage object (drive, RAID member, LUN, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// No object.
    pub const INVALID: ObjectId = ObjectId(u32::MAX);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "obj:0x{:x}", self.0)
        } else {
            f.write_str("obj:invalid")
        }
    }
}

static NEXT_SERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one block transport server instance.
///
/// Distinct from the owning [`ObjectId`]: a server id is never reused, so
/// stale events that still name a destroyed server cannot reach its
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub u64);

impl ServerId {
    /// Allocate a fresh, process-unique server id.
    #[must_use]
    pub fn allocate() -> Self {
        ServerId(NEXT_SERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bts:{}", self.0)
    }
}

/// Slot index of an edge on either side of a connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EdgeIndex(pub u32);

impl EdgeIndex {
    /// Not attached.
    pub const INVALID: EdgeIndex = EdgeIndex(u32::MAX);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for EdgeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle naming one attached edge: the server that owns it plus its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeHandle {
    pub server: ServerId,
    pub server_index: EdgeIndex,
}

/// Software package an object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PackageId {
    #[default]
    Invalid,
    Physical,
    Sep,
    Esp,
    Neit,
}

// =============================================================================
// CLUSTER C: PRIORITIES
// =============================================================================

/// Priority of a packet entering admission control.
///
/// One FIFO queue exists per valid priority; `Invalid` has no queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum PacketPriority {
    Invalid = 0,
    Low = 1,
    #[default]
    Normal = 2,
    Urgent = 3,
}

/// Number of priority queues (`Low`, `Normal`, `Urgent`).
pub const PACKET_PRIORITY_QUEUES: usize = 3;

impl PacketPriority {
    /// Valid priorities, highest first.
    pub const DESCENDING: [PacketPriority; PACKET_PRIORITY_QUEUES] = [
        PacketPriority::Urgent,
        PacketPriority::Normal,
        PacketPriority::Low,
    ];

    /// Queue index for this priority (`priority - 1`).
    ///
    /// `Invalid` maps onto the `Low` queue.
    #[must_use]
    pub fn queue_index(self) -> usize {
        match self {
            PacketPriority::Invalid | PacketPriority::Low => 0,
            PacketPriority::Normal => 1,
            PacketPriority::Urgent => 2,
        }
    }

    /// Inverse of [`queue_index`](Self::queue_index).
    #[must_use]
    pub fn from_queue_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(PacketPriority::Low),
            1 => Some(PacketPriority::Normal),
            2 => Some(PacketPriority::Urgent),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PacketPriority {
    type Error = ValueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketPriority::Invalid),
            1 => Ok(PacketPriority::Low),
            2 => Ok(PacketPriority::Normal),
            3 => Ok(PacketPriority::Urgent),
            other => Err(ValueError::UnknownPriority(other)),
        }
    }
}

/// Traffic load advertised on an edge, used by clients to pace background work.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum TrafficPriority {
    #[default]
    Invalid,
    VeryLow,
    Low,
    Normal,
    High,
    VeryHigh,
}

impl TrafficPriority {
    /// The higher of two traffic priorities.
    #[must_use]
    pub fn highest(self, other: TrafficPriority) -> TrafficPriority {
        self.max(other)
    }
}

/// Priority of the background (medic) action running over an edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum MedicActionPriority {
    #[default]
    Idle,
    Zero,
    ReadOnlyVerify,
    ReadWriteVerify,
    ErrorVerify,
    Copy,
    Rebuild,
}

impl MedicActionPriority {
    /// The more urgent of two medic priorities.
    #[must_use]
    pub fn highest(self, other: MedicActionPriority) -> MedicActionPriority {
        self.max(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_index_round_trip() {
        for priority in PacketPriority::DESCENDING {
            let index = priority.queue_index();
            assert_eq!(PacketPriority::from_queue_index(index), Some(priority));
        }
        assert_eq!(PacketPriority::from_queue_index(3), None);
    }

    #[test]
    fn test_descending_order() {
        assert!(PacketPriority::DESCENDING[0] > PacketPriority::DESCENDING[1]);
        assert!(PacketPriority::DESCENDING[1] > PacketPriority::DESCENDING[2]);
    }

    #[test]
    fn test_priority_from_u8() {
        assert_eq!(PacketPriority::try_from(3).unwrap(), PacketPriority::Urgent);
        assert!(PacketPriority::try_from(9).is_err());
    }

    #[test]
    fn test_server_ids_are_unique() {
        let a = ServerId::allocate();
        let b = ServerId::allocate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_traffic_priority_highest() {
        assert_eq!(
            TrafficPriority::Low.highest(TrafficPriority::High),
            TrafficPriority::High
        );
        assert_eq!(
            MedicActionPriority::Rebuild.highest(MedicActionPriority::Zero),
            MedicActionPriority::Rebuild
        );
    }

    #[test]
    fn test_invalid_object_display() {
        assert_eq!(ObjectId::INVALID.to_string(), "obj:invalid");
        assert_eq!(ObjectId(0x10b).to_string(), "obj:0x10b");
    }
}
