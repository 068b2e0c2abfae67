//! Control request handler
//!
//! Routes control requests to the transport server of the target object.
//!
//! | Code | Request                      | Response                 |
//! |------|------------------------------|--------------------------|
//! | 0x01 | `CreateEdge`                 | `EdgeCreated`            |
//! | 0x02 | `DestroyEdge`                | `EdgeDetached`           |
//! | 0x03 | `AttachEdge`                 | `EdgeAttached`           |
//! | 0x04 | `DetachEdge`                 | `EdgeDetached`           |
//! | 0x05 | `OpenEdge`                   | `PathState`              |
//! | 0x06 | `GetPathState`               | `PathState`              |
//! | 0x07 | `GetEdgeInfo`                | `EdgeInfo`               |
//! | 0x08 | `SetEdgeTapHook`             | `Ok`                     |
//! | 0x09 | `RemoveEdgeTapHook`          | `Ok`                     |
//! | 0x0a | `ValidateCapacity`           | `Placement`              |
//! | 0x0b | `GetMaxUnusedExtentSize`     | `MaxUnusedExtentSize`    |
//! | 0x0c | `ClientHibernating`          | `Ok`                     |
//! | 0x0d | `ExitHibernation`            | `Ok`                     |
//! | 0x0e | `NegotiateBlockSize`         | `BlockSize`              |
//! | 0x0f | `IoCommand`                  | `IoSubmitted`            |
//! | 0x10 | `UpdateLogicalErrorStats`    | `Ok`                     |
//! | 0x11 | `ClearLogicalErrors`         | `Ok`                     |
//! | 0x12 | `LogicalDriveStateChanged`   | `Ok`                     |
//! | 0x13 | `GetThrottleInfo`            | `ThrottleInfo`           |
//! | 0x14 | `SetThrottleInfo`            | `Ok`                     |

use serde::{Deserialize, Serialize};
use shared_types::{ObjectId, TransportStatus, ValueError};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{BlockEdge, BlockOperation, IoPacket, PathAttributes};
use crate::error::TransportError;
use crate::ipc::requests::{
    AttachEdgeRequest, ClientHibernatingRequest, ClientRequest, CreateEdgeRequest, EdgeRequest,
    IoCommandRequest, LogicalDriveStateChangedRequest, SetEdgeTapHookRequest,
    UpdateLogicalErrorStatsRequest, ValidateCapacityRequest,
};
use crate::ipc::responses::ControlResponse;
use crate::ports::ThrottleSettings;
use crate::service::{BlockTransportServer, TransportTopology};

/// Wire opcode of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ControlCode {
    CreateEdge = 0x01,
    DestroyEdge = 0x02,
    AttachEdge = 0x03,
    DetachEdge = 0x04,
    OpenEdge = 0x05,
    GetPathState = 0x06,
    GetEdgeInfo = 0x07,
    SetEdgeTapHook = 0x08,
    RemoveEdgeTapHook = 0x09,
    ValidateCapacity = 0x0a,
    GetMaxUnusedExtentSize = 0x0b,
    ClientHibernating = 0x0c,
    ExitHibernation = 0x0d,
    NegotiateBlockSize = 0x0e,
    IoCommand = 0x0f,
    UpdateLogicalErrorStats = 0x10,
    ClearLogicalErrors = 0x11,
    LogicalDriveStateChanged = 0x12,
    GetThrottleInfo = 0x13,
    SetThrottleInfo = 0x14,
}

impl TryFrom<u32> for ControlCode {
    type Error = ValueError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => ControlCode::CreateEdge,
            0x02 => ControlCode::DestroyEdge,
            0x03 => ControlCode::AttachEdge,
            0x04 => ControlCode::DetachEdge,
            0x05 => ControlCode::OpenEdge,
            0x06 => ControlCode::GetPathState,
            0x07 => ControlCode::GetEdgeInfo,
            0x08 => ControlCode::SetEdgeTapHook,
            0x09 => ControlCode::RemoveEdgeTapHook,
            0x0a => ControlCode::ValidateCapacity,
            0x0b => ControlCode::GetMaxUnusedExtentSize,
            0x0c => ControlCode::ClientHibernating,
            0x0d => ControlCode::ExitHibernation,
            0x0e => ControlCode::NegotiateBlockSize,
            0x0f => ControlCode::IoCommand,
            0x10 => ControlCode::UpdateLogicalErrorStats,
            0x11 => ControlCode::ClearLogicalErrors,
            0x12 => ControlCode::LogicalDriveStateChanged,
            0x13 => ControlCode::GetThrottleInfo,
            0x14 => ControlCode::SetThrottleInfo,
            other => return Err(ValueError::UnknownControlCode(other)),
        })
    }
}

/// A control request and its arguments.
#[derive(Clone, Debug)]
pub enum ControlRequest {
    CreateEdge(CreateEdgeRequest),
    DestroyEdge(ClientRequest),
    AttachEdge(AttachEdgeRequest),
    DetachEdge(EdgeRequest),
    OpenEdge(EdgeRequest),
    GetPathState(EdgeRequest),
    GetEdgeInfo(EdgeRequest),
    SetEdgeTapHook(SetEdgeTapHookRequest),
    RemoveEdgeTapHook(EdgeRequest),
    ValidateCapacity(ValidateCapacityRequest),
    GetMaxUnusedExtentSize,
    ClientHibernating(ClientHibernatingRequest),
    ExitHibernation(ClientRequest),
    NegotiateBlockSize(EdgeRequest),
    IoCommand(IoCommandRequest),
    UpdateLogicalErrorStats(UpdateLogicalErrorStatsRequest),
    ClearLogicalErrors,
    LogicalDriveStateChanged(LogicalDriveStateChangedRequest),
    GetThrottleInfo,
    SetThrottleInfo(ThrottleSettings),
}

impl ControlRequest {
    #[must_use]
    pub fn code(&self) -> ControlCode {
        match self {
            ControlRequest::CreateEdge(_) => ControlCode::CreateEdge,
            ControlRequest::DestroyEdge(_) => ControlCode::DestroyEdge,
            ControlRequest::AttachEdge(_) => ControlCode::AttachEdge,
            ControlRequest::DetachEdge(_) => ControlCode::DetachEdge,
            ControlRequest::OpenEdge(_) => ControlCode::OpenEdge,
            ControlRequest::GetPathState(_) => ControlCode::GetPathState,
            ControlRequest::GetEdgeInfo(_) => ControlCode::GetEdgeInfo,
            ControlRequest::SetEdgeTapHook(_) => ControlCode::SetEdgeTapHook,
            ControlRequest::RemoveEdgeTapHook(_) => ControlCode::RemoveEdgeTapHook,
            ControlRequest::ValidateCapacity(_) => ControlCode::ValidateCapacity,
            ControlRequest::GetMaxUnusedExtentSize => ControlCode::GetMaxUnusedExtentSize,
            ControlRequest::ClientHibernating(_) => ControlCode::ClientHibernating,
            ControlRequest::ExitHibernation(_) => ControlCode::ExitHibernation,
            ControlRequest::NegotiateBlockSize(_) => ControlCode::NegotiateBlockSize,
            ControlRequest::IoCommand(_) => ControlCode::IoCommand,
            ControlRequest::UpdateLogicalErrorStats(_) => ControlCode::UpdateLogicalErrorStats,
            ControlRequest::ClearLogicalErrors => ControlCode::ClearLogicalErrors,
            ControlRequest::LogicalDriveStateChanged(_) => ControlCode::LogicalDriveStateChanged,
            ControlRequest::GetThrottleInfo => ControlCode::GetThrottleInfo,
            ControlRequest::SetThrottleInfo(_) => ControlCode::SetThrottleInfo,
        }
    }
}

/// Routes control requests through a [`TransportTopology`].
pub struct ControlHandler {
    topology: Arc<TransportTopology>,
}

impl ControlHandler {
    pub fn new(topology: Arc<TransportTopology>) -> Self {
        Self { topology }
    }

    #[must_use]
    pub fn topology(&self) -> &Arc<TransportTopology> {
        &self.topology
    }

    /// Run `request` against the server owned by `target`.
    pub fn execute(
        &self,
        target: ObjectId,
        request: ControlRequest,
    ) -> Result<ControlResponse, TransportError> {
        let code = request.code();
        let server = self.topology.server(target)?;
        let result = Self::apply(&server, request);
        match &result {
            Ok(_) => debug!(%target, ?code, "Control request done"),
            Err(error) => warn!(%target, ?code, %error, "Control request failed"),
        }
        result
    }

    /// Like [`execute`](Self::execute), reduced to a wire status.
    pub fn execute_status(&self, target: ObjectId, request: ControlRequest) -> TransportStatus {
        match self.execute(target, request) {
            Ok(_) => TransportStatus::Ok,
            Err(error) => error.status(),
        }
    }

    fn apply(
        server: &BlockTransportServer,
        request: ControlRequest,
    ) -> Result<ControlResponse, TransportError> {
        let response = match request {
            ControlRequest::CreateEdge(req) => {
                let placement =
                    server.validate_capacity(req.capacity, req.placement, req.ignore_offset)?;
                let mut edge =
                    BlockEdge::new(req.client_id, req.client_index, req.capacity, placement.offset)
                        .with_geometry(req.geometry);
                if req.ignore_offset {
                    edge = edge.with_path_attributes(PathAttributes::CLIENT_IGNORE_OFFSET);
                }
                edge.traffic_priority = req.traffic_priority;
                edge.client_package = req.client_package;
                edge.server_package = req.server_package;
                let handle = server.attach_edge(edge)?;
                ControlResponse::EdgeCreated { handle, placement }
            }
            ControlRequest::DestroyEdge(req) => {
                ControlResponse::EdgeDetached(server.detach_client_edge(req.client_id)?.info())
            }
            ControlRequest::AttachEdge(req) => {
                let edge = BlockEdge::new(req.client_id, req.client_index, req.capacity, req.offset)
                    .with_geometry(req.geometry)
                    .with_path_attributes(req.path_attributes);
                ControlResponse::EdgeAttached(server.attach_edge(edge)?)
            }
            ControlRequest::DetachEdge(req) => {
                ControlResponse::EdgeDetached(server.detach_edge(req.server_index)?.info())
            }
            ControlRequest::OpenEdge(req) => {
                ControlResponse::PathState(server.open_edge(req.server_index)?)
            }
            ControlRequest::GetPathState(req) => {
                ControlResponse::PathState(server.edge_path_state(req.server_index)?)
            }
            ControlRequest::GetEdgeInfo(req) => {
                ControlResponse::EdgeInfo(server.edge_info(req.server_index)?)
            }
            ControlRequest::SetEdgeTapHook(req) => {
                server.set_tap_hook(req.server_index, req.hook)?;
                ControlResponse::Ok
            }
            ControlRequest::RemoveEdgeTapHook(req) => {
                server.remove_tap_hook(req.server_index)?;
                ControlResponse::Ok
            }
            ControlRequest::ValidateCapacity(req) => ControlResponse::Placement(
                server.validate_capacity(req.capacity, req.placement, req.ignore_offset)?,
            ),
            ControlRequest::GetMaxUnusedExtentSize => {
                ControlResponse::MaxUnusedExtentSize(server.max_unused_extent_size())
            }
            ControlRequest::ClientHibernating(req) => {
                server.client_hibernating(req.client_id, req.info)?;
                ControlResponse::Ok
            }
            ControlRequest::ExitHibernation(req) => {
                server.exit_hibernation(req.client_id)?;
                ControlResponse::Ok
            }
            ControlRequest::NegotiateBlockSize(req) => {
                ControlResponse::BlockSize(server.negotiate_block_size(req.server_index)?)
            }
            ControlRequest::IoCommand(req) => {
                let packet = IoPacket::new(
                    req.priority,
                    BlockOperation::new(req.opcode, req.lba, req.block_count),
                )
                .with_flags(req.flags);
                let id = packet.id();
                let outcome = server.send_io(req.server_index, packet);
                ControlResponse::IoSubmitted { packet: id, outcome }
            }
            ControlRequest::UpdateLogicalErrorStats(req) => {
                server.update_logical_error_stats(req.error_type);
                ControlResponse::Ok
            }
            ControlRequest::ClearLogicalErrors => {
                server.clear_logical_errors();
                ControlResponse::Ok
            }
            ControlRequest::LogicalDriveStateChanged(req) => {
                server.logical_drive_state_changed(req.drive_state);
                ControlResponse::Ok
            }
            ControlRequest::GetThrottleInfo => {
                ControlResponse::ThrottleInfo(server.get_throttle_info())
            }
            ControlRequest::SetThrottleInfo(settings) => {
                server.set_throttle_settings(settings)?;
                ControlResponse::Ok
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BlockEdgeGeometry, BlockOpcode, LogicalErrorType, PacketFlags, PlacementPolicy,
        TransportServerConfig,
    };
    use crate::ports::{AdmissionOutcome, MockLifecycle, MockTransportObject};
    use shared_bus::{EventService, EventServiceConfig};
    use shared_types::{EdgeIndex, PackageId, PacketPriority, PathState, TrafficPriority};

    const TARGET: ObjectId = ObjectId(0x100);

    struct Fixture {
        handler: ControlHandler,
        owner: Arc<MockTransportObject>,
    }

    fn fixture() -> Fixture {
        let owner = Arc::new(MockTransportObject::new(TARGET));
        let events = Arc::new(EventService::new(EventServiceConfig::default()).unwrap());
        let server = BlockTransportServer::new(
            &owner,
            Arc::new(MockLifecycle::default()),
            events,
            TransportServerConfig::new(1_000).with_default_offset(10),
        )
        .unwrap();
        let topology = Arc::new(TransportTopology::new());
        topology.register(server).unwrap();
        Fixture {
            handler: ControlHandler::new(topology),
            owner,
        }
    }

    fn create(client: u32, capacity: u64, placement: PlacementPolicy) -> ControlRequest {
        ControlRequest::CreateEdge(CreateEdgeRequest {
            client_id: ObjectId(client),
            client_index: EdgeIndex(0),
            capacity,
            placement,
            ignore_offset: false,
            geometry: BlockEdgeGeometry::Native520,
            traffic_priority: TrafficPriority::Normal,
            client_package: PackageId::Invalid,
            server_package: PackageId::Invalid,
        })
    }

    #[test]
    fn test_control_code_roundtrip() {
        for raw in 0x01..=0x14 {
            let code = ControlCode::try_from(raw).unwrap();
            assert_eq!(code as u32, raw);
        }
        assert_eq!(
            ControlCode::try_from(0x99),
            Err(ValueError::UnknownControlCode(0x99))
        );
    }

    #[test]
    fn test_create_edge_places_after_default_offset() {
        let f = fixture();
        let response = f
            .handler
            .execute(TARGET, create(0x200, 100, PlacementPolicy::FirstFit))
            .unwrap();
        let ControlResponse::EdgeCreated { handle, placement } = response else {
            panic!("unexpected response {response:?}");
        };
        assert_eq!(placement.offset, 10);

        let info = f
            .handler
            .execute(
                TARGET,
                ControlRequest::GetEdgeInfo(EdgeRequest {
                    server_index: handle.server_index,
                }),
            )
            .unwrap();
        let ControlResponse::EdgeInfo(info) = info else {
            panic!("unexpected response {info:?}");
        };
        assert_eq!(info.offset, 10);
        assert_eq!(info.path_state, PathState::Enabled);
        assert_eq!(info.traffic_priority, TrafficPriority::Normal);
    }

    #[test]
    fn test_destroy_and_detach() {
        let f = fixture();
        f.handler
            .execute(TARGET, create(0x200, 100, PlacementPolicy::FirstFit))
            .unwrap();
        let response = f
            .handler
            .execute(
                TARGET,
                ControlRequest::DestroyEdge(ClientRequest {
                    client_id: ObjectId(0x200),
                }),
            )
            .unwrap();
        assert!(matches!(
            response,
            ControlResponse::EdgeDetached(info) if info.client_id == ObjectId(0x200)
        ));

        let status = f.handler.execute_status(
            TARGET,
            ControlRequest::DetachEdge(EdgeRequest {
                server_index: EdgeIndex(0),
            }),
        );
        assert_eq!(status, TransportStatus::GenericFailure);
    }

    #[test]
    fn test_unknown_target() {
        let f = fixture();
        assert_eq!(
            f.handler
                .execute_status(ObjectId(0x999), ControlRequest::GetThrottleInfo),
            TransportStatus::NoObject
        );
    }

    #[test]
    fn test_io_command_dispatches() {
        let f = fixture();
        f.handler
            .execute(
                TARGET,
                ControlRequest::AttachEdge(AttachEdgeRequest {
                    client_id: ObjectId(0x200),
                    client_index: EdgeIndex(0),
                    capacity: 100,
                    offset: 200,
                    geometry: BlockEdgeGeometry::Native512,
                    path_attributes: PathAttributes::NONE,
                }),
            )
            .unwrap();
        let response = f
            .handler
            .execute(
                TARGET,
                ControlRequest::IoCommand(IoCommandRequest {
                    server_index: EdgeIndex(0),
                    priority: PacketPriority::Normal,
                    opcode: BlockOpcode::Read,
                    lba: 5,
                    block_count: 1,
                    flags: PacketFlags::NONE,
                }),
            )
            .unwrap();
        assert!(matches!(
            response,
            ControlResponse::IoSubmitted {
                outcome: AdmissionOutcome::Dispatched,
                ..
            }
        ));
        assert_eq!(f.owner.held_lbas(), vec![205]);
    }

    #[test]
    fn test_capacity_queries() {
        let f = fixture();
        let response = f
            .handler
            .execute(TARGET, ControlRequest::GetMaxUnusedExtentSize)
            .unwrap();
        assert_eq!(response, ControlResponse::MaxUnusedExtentSize(990));

        let err = f
            .handler
            .execute(
                TARGET,
                ControlRequest::ValidateCapacity(ValidateCapacityRequest {
                    capacity: 2_000,
                    placement: PlacementPolicy::BestFit,
                    ignore_offset: false,
                }),
            )
            .unwrap_err();
        assert_eq!(err, TransportError::NoAvailableExtent { available: 990 });
    }

    #[test]
    fn test_throttle_and_logical_errors() {
        let f = fixture();
        f.handler
            .execute(
                TARGET,
                ControlRequest::SetThrottleInfo(ThrottleSettings {
                    outstanding_io_max: 16,
                    io_throttle_max: 0,
                    io_credits_max: 0,
                }),
            )
            .unwrap();
        let response = f
            .handler
            .execute(TARGET, ControlRequest::GetThrottleInfo)
            .unwrap();
        let ControlResponse::ThrottleInfo(info) = response else {
            panic!("unexpected response {response:?}");
        };
        assert_eq!(info.outstanding_io_max, 16);

        f.handler
            .execute(
                TARGET,
                ControlRequest::UpdateLogicalErrorStats(UpdateLogicalErrorStatsRequest {
                    error_type: LogicalErrorType::Timeout,
                }),
            )
            .unwrap();
        let server = f.handler.topology().server(TARGET).unwrap();
        assert_eq!(server.logical_error_counts().timeout, 1);
        f.handler
            .execute(TARGET, ControlRequest::ClearLogicalErrors)
            .unwrap();
        assert_eq!(server.logical_error_counts().total(), 0);
    }
}
