//! Control plane: opcodes, request and response messages, and the handler
//! that routes them to transport servers.

pub mod handler;
pub mod requests;
pub mod responses;

pub use handler::{ControlCode, ControlHandler, ControlRequest};
pub use requests::{
    AttachEdgeRequest, ClientHibernatingRequest, ClientRequest, CreateEdgeRequest, EdgeRequest,
    IoCommandRequest, LogicalDriveStateChangedRequest, SetEdgeTapHookRequest,
    UpdateLogicalErrorStatsRequest, ValidateCapacityRequest,
};
pub use responses::ControlResponse;
