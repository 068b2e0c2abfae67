//! Domain layer: edges, admission bookkeeping and extent placement.

pub mod attributes;
pub mod config;
pub mod credits;
pub mod edge;
pub mod geometry;
pub mod lifecycle;
pub mod packet;
pub mod queues;
pub mod registry;

pub use attributes::{
    HibernationInfo, LogicalDriveState, LogicalErrorCounts, LogicalErrorType, PathAttributes,
    ServerFlags,
};
pub use config::TransportServerConfig;
pub use credits::{base_credits, CreditBuckets, IoCredits, ThrottleState};
pub use edge::{BlockEdge, EdgeInfo, EdgeTapHook};
pub use geometry::{align_io, BlockEdgeGeometry, NegotiatedBlockSize};
pub use lifecycle::DrainPolicy;
pub use packet::{
    BlockOpcode, BlockOperation, BlockOperationQualifier, BlockOperationStatus, IoPacket,
    PacketCompletion, PacketFlags, PacketId,
};
pub use queues::PriorityQueues;
pub use registry::{CapacityPlacement, EdgeRegistry, PlacementPolicy};
