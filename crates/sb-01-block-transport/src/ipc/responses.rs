//! Control-plane response messages

use serde::{Deserialize, Serialize};
use shared_types::{BlockCount, EdgeHandle, PathState};

use crate::domain::{CapacityPlacement, EdgeInfo, NegotiatedBlockSize, PacketId};
use crate::ports::{AdmissionOutcome, ThrottleInfo};

/// Successful result of a control request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Done, nothing to report.
    Ok,
    EdgeCreated {
        handle: EdgeHandle,
        placement: CapacityPlacement,
    },
    EdgeAttached(EdgeHandle),
    /// Snapshot of the edge as it was when detached.
    EdgeDetached(EdgeInfo),
    PathState(PathState),
    EdgeInfo(EdgeInfo),
    Placement(CapacityPlacement),
    MaxUnusedExtentSize(BlockCount),
    BlockSize(NegotiatedBlockSize),
    IoSubmitted {
        packet: PacketId,
        outcome: AdmissionOutcome,
    },
    ThrottleInfo(ThrottleInfo),
}
