//! Control-plane request messages
//!
//! Each request is bound to one [`ControlCode`](super::ControlCode). All of
//! them serialize except the tap hook request, which carries a closure.

use serde::{Deserialize, Serialize};
use shared_types::{
    BlockCount, EdgeIndex, Lba, ObjectId, PackageId, PacketPriority, TrafficPriority,
};
use std::fmt;

use crate::domain::{
    BlockEdgeGeometry, BlockOpcode, EdgeTapHook, HibernationInfo, LogicalDriveState,
    LogicalErrorType, PacketFlags, PathAttributes, PlacementPolicy,
};

/// Place and attach a new edge in one step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEdgeRequest {
    pub client_id: ObjectId,
    pub client_index: EdgeIndex,
    pub capacity: BlockCount,
    pub placement: PlacementPolicy,
    pub ignore_offset: bool,
    pub geometry: BlockEdgeGeometry,
    pub traffic_priority: TrafficPriority,
    pub client_package: PackageId,
    pub server_package: PackageId,
}

/// Attach an edge at a caller-chosen offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachEdgeRequest {
    pub client_id: ObjectId,
    pub client_index: EdgeIndex,
    pub capacity: BlockCount,
    pub offset: Lba,
    pub geometry: BlockEdgeGeometry,
    pub path_attributes: PathAttributes,
}

/// Requests that name a client rather than an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub client_id: ObjectId,
}

/// Requests that name one edge by server index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRequest {
    pub server_index: EdgeIndex,
}

pub struct SetEdgeTapHookRequest {
    pub server_index: EdgeIndex,
    pub hook: EdgeTapHook,
}

impl Clone for SetEdgeTapHookRequest {
    fn clone(&self) -> Self {
        Self {
            server_index: self.server_index,
            hook: self.hook.clone(),
        }
    }
}

impl fmt::Debug for SetEdgeTapHookRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetEdgeTapHookRequest")
            .field("server_index", &self.server_index)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateCapacityRequest {
    pub capacity: BlockCount,
    pub placement: PlacementPolicy,
    pub ignore_offset: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHibernatingRequest {
    pub client_id: ObjectId,
    pub info: HibernationInfo,
}

/// Build a packet and send it over an edge. Lba is in edge coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCommandRequest {
    pub server_index: EdgeIndex,
    pub priority: PacketPriority,
    pub opcode: BlockOpcode,
    pub lba: Lba,
    pub block_count: BlockCount,
    pub flags: PacketFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLogicalErrorStatsRequest {
    pub error_type: LogicalErrorType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDriveStateChangedRequest {
    pub drive_state: LogicalDriveState,
}
