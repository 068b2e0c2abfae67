//! Error types for the block transport

use shared_bus::StackError;
use shared_types::{BlockCount, EdgeIndex, Lba, ObjectId, PathState, TransportStatus};
use thiserror::Error;

/// Errors raised by transport servers, edges and the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Edge from {client} slot {client_index} is already attached")]
    EdgeAlreadyAttached {
        client: ObjectId,
        client_index: EdgeIndex,
    },

    #[error("No edge attached at server index {0}")]
    EdgeNotAttached(EdgeIndex),

    #[error("Edge is not enabled: path state {0:?}")]
    EdgeNotEnabled(PathState),

    #[error("Edge capacity cannot be 0")]
    ZeroCapacity,

    #[error("Extent end {requested} exceeds server capacity {available}")]
    CapacityExceeded {
        requested: BlockCount,
        available: BlockCount,
    },

    #[error("Extent at {offset} (+{capacity}) overlaps an attached edge")]
    ExtentOverlap { offset: Lba, capacity: BlockCount },

    #[error("No free extent large enough: {available} blocks available")]
    NoAvailableExtent { available: BlockCount },

    #[error("Invalid block edge geometry: {0}")]
    InvalidGeometry(u32),

    #[error("Request past end of edge: lba {lba} + {blocks} > {capacity}")]
    BeyondCapacity {
        lba: Lba,
        blocks: BlockCount,
        capacity: BlockCount,
    },

    #[error("Transport server still has {queued} queued packets")]
    QueuesNotEmpty { queued: usize },

    #[error("No transport server for {0}")]
    ServerNotFound(ObjectId),

    #[error("Owning object has been dropped")]
    OwnerGone,

    #[error("Client refused the event: {0}")]
    ClientBusy(String),

    #[error("Event stack: {0}")]
    Stack(#[from] StackError),

    #[error("Event service not running")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Wire status reported for this error.
    #[must_use]
    pub fn status(&self) -> TransportStatus {
        match self {
            TransportError::EdgeNotEnabled(_) => TransportStatus::EdgeNotEnabled,
            TransportError::QueuesNotEmpty { .. } | TransportError::ClientBusy(_) => {
                TransportStatus::Busy
            }
            TransportError::ServerNotFound(_) | TransportError::OwnerGone => {
                TransportStatus::NoObject
            }
            TransportError::NotInitialized => TransportStatus::NotInitialized,
            TransportError::Stack(_) => TransportStatus::InsufficientResources,
            _ => TransportStatus::GenericFailure,
        }
    }
}
