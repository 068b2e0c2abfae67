//! # SB-01 Block Transport
//!
//! Point-to-point block edges between storage objects, and the per-server
//! admission engine that queues, throttles and gates I/O sent over them.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure bookkeeping, no locking
//!   - `BlockEdge`: one client's window onto a server's blocks
//!   - `EdgeRegistry`: sorted edge list, extent placement and queries
//!   - `CreditBuckets` / `ThrottleState`: per-priority budgets and ceilings
//!   - `PriorityQueues`: URGENT, NORMAL and LOW FIFO queues
//!   - `TransportServerConfig`: configuration with validation
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `BlockTransportApi`: Driving port (inbound API)
//!   - `TransportObject`: Driven port (the object that owns or uses a server)
//!   - `LifecycleGateway`: Driven port (lifecycle state of the owner)
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `BlockTransportServer`: Implements `BlockTransportApi`
//!   - `ExtentFanout`: event fan-out across overlapping edges
//!   - `TransportTopology`: live servers by owning object
//!
//! - **IPC Layer** (`ipc/`): Control plane
//!   - `ControlHandler`: routes `ControlRequest`s to servers
//!
//! ## Admission
//!
//! A packet sent over an edge is rebased by the edge offset, offered to the
//! edge tap hook, then admitted. Admission dispatches it to the owner,
//! queues it by priority, or completes it at the door:
//!
//! | Server state         | Outcome                                   |
//! |----------------------|-------------------------------------------|
//! | Slumber path state   | Queued, owner told I/O is waiting         |
//! | FLUSH_AND_BLOCK      | Completed `Dead`                          |
//! | FORCE_COMPLETION     | Completed with the configured status      |
//! | HOLD                 | Queued (monitor/DO_NOT_HOLD: `Quiesced`)  |
//! | over a ceiling       | Queued                                    |
//! | otherwise            | Dispatched                                |
//!
//! Every completion restarts queued work in priority order while the
//! outstanding, throttle and credit ceilings allow.
//!
//! ## Usage Example
//!
//! ```ignore
//! use sb_01_block_transport::{BlockEdge, BlockTransportServer, TransportServerConfig};
//!
//! let server = BlockTransportServer::new(
//!     &owner,
//!     lifecycle,
//!     events,
//!     TransportServerConfig::new(1_000).with_outstanding_io_max(32),
//! )?;
//! let handle = server.attach_edge(BlockEdge::new(client_id, EdgeIndex(0), 500, 0))?;
//! server.send_io(handle.server_index, packet);
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod domain;
pub mod error;
pub mod ipc;
pub mod metrics;
pub mod ports;
pub mod service;

pub use domain::{
    align_io, BlockEdge, BlockEdgeGeometry, BlockOpcode, BlockOperation, BlockOperationQualifier,
    BlockOperationStatus, CapacityPlacement, CreditBuckets, EdgeInfo, EdgeRegistry, EdgeTapHook,
    HibernationInfo, IoCredits, IoPacket, LogicalDriveState, LogicalErrorCounts, LogicalErrorType,
    NegotiatedBlockSize, PacketFlags, PacketId, PathAttributes, PlacementPolicy, ServerFlags,
    TransportServerConfig,
};
pub use error::TransportError;
pub use ipc::{ControlCode, ControlHandler, ControlRequest, ControlResponse};
pub use metrics::{TransportMetrics, TransportMetricsSnapshot};
pub use ports::{
    AdmissionOutcome, BlockTransportApi, LifecycleGateway, ThrottleInfo, ThrottleSettings,
    TransportObject,
};
pub use service::{BlockTransportServer, ExtentFanout, TransportTopology};

/// Mock implementations of the driven ports, for tests in dependent crates.
pub mod testing {
    pub use crate::ports::{DeliveredEvent, MockLifecycle, MockTransportObject};
}
