//! Ports layer (hexagonal architecture)

pub mod inbound;
pub mod outbound;

pub use inbound::{AdmissionOutcome, BlockTransportApi, ThrottleInfo, ThrottleSettings};
pub use outbound::{
    DeliveredEvent, LifecycleGateway, MockLifecycle, MockTransportObject, TransportObject,
};
