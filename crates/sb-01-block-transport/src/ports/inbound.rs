//! Inbound Ports (Driving Ports)
//!
//! The API clients and the owning object use to drive a transport server.

use serde::{Deserialize, Serialize};
use shared_bus::{Event, SendOutcome};
use shared_types::{
    EdgeHandle, EdgeIndex, LifecycleState, LifecycleStatus, ServerId, TransportStatus,
    PACKET_PRIORITY_QUEUES,
};

use crate::domain::{BlockEdge, IoPacket};
use crate::error::TransportError;

/// What admission did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionOutcome {
    /// Handed to the owner's I/O entry.
    Dispatched,
    /// Held on a priority queue.
    Queued,
    /// Consumed by the edge's tap hook.
    Intercepted,
    /// Completed without dispatch, with this status.
    Completed(TransportStatus),
}

/// Throttle counters and ceilings of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThrottleInfo {
    pub outstanding_io_count: u32,
    pub outstanding_io_max: u32,
    pub io_throttle_count: u64,
    pub io_throttle_max: u64,
    pub io_credits_max: u32,
    pub outstanding_io_credits: u32,
    /// Queue lengths indexed LOW, NORMAL, URGENT.
    pub queue_length: [usize; PACKET_PRIORITY_QUEUES],
}

/// Ceilings accepted by [`BlockTransportApi::set_throttle_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThrottleSettings {
    pub outstanding_io_max: u32,
    pub io_throttle_max: u64,
    pub io_credits_max: u32,
}

/// Primary transport server API (Driving Port)
pub trait BlockTransportApi: Send + Sync {
    fn server_id(&self) -> ServerId;

    /// Send a packet over an attached edge. The packet is always consumed;
    /// failures complete it with a status.
    fn send_io(&self, edge: EdgeIndex, packet: IoPacket) -> AdmissionOutcome;

    fn attach_edge(&self, edge: BlockEdge) -> Result<EdgeHandle, TransportError>;

    fn detach_edge(&self, index: EdgeIndex) -> Result<BlockEdge, TransportError>;

    fn hold(&self);

    fn resume(&self);

    fn throttle_info(&self) -> ThrottleInfo;

    fn set_throttle_info(&self, settings: ThrottleSettings) -> Result<(), TransportError>;

    /// Drain queues for a pending lifecycle transition.
    fn drain_all_queues(&self, state: LifecycleState) -> LifecycleStatus;

    /// Raise an event on this server's edges.
    fn send_event(&self, event: Event) -> SendOutcome;
}
