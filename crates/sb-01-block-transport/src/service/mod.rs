//! Service Layer
//!
//! The transport server, split by concern across files that each extend
//! [`BlockTransportServer`], plus the topology of live servers.

mod admission;
mod edges;
pub mod events;
pub mod server;
pub mod topology;

pub use events::ExtentFanout;
pub use server::BlockTransportServer;
pub use topology::TransportTopology;
