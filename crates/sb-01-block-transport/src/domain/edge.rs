//! Block edges: the connection from a client object into a server's extent.

use serde::{Deserialize, Serialize};
use shared_types::{
    BlockCount, EdgeHandle, EdgeIndex, Lba, MedicActionPriority, ObjectId, PackageId, PathState,
    ServerId, TrafficPriority,
};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::domain::attributes::{HibernationInfo, PathAttributes};
use crate::domain::geometry::{BlockEdgeGeometry, NegotiatedBlockSize};
use crate::domain::packet::IoPacket;
use crate::error::TransportError;
use crate::ports::outbound::TransportObject;

/// Test tap installed on an edge. Returning `None` consumes the packet.
pub type EdgeTapHook = Arc<dyn Fn(IoPacket) -> Option<IoPacket> + Send + Sync>;

/// A directed connection from a client to a server's exported block range.
///
/// Offset and capacity are in client block-size units.
#[derive(Clone)]
pub struct BlockEdge {
    pub client_id: ObjectId,
    pub client_index: EdgeIndex,
    pub server_id: ObjectId,
    pub(crate) server: Option<ServerId>,
    pub(crate) server_index: EdgeIndex,
    pub capacity: BlockCount,
    pub offset: Lba,
    pub geometry: BlockEdgeGeometry,
    pub traffic_priority: TrafficPriority,
    pub medic_priority: MedicActionPriority,
    pub client_package: PackageId,
    pub server_package: PackageId,
    pub time_to_become_ready_in_sec: u64,
    pub hibernation: Option<HibernationInfo>,
    path_state: PathState,
    path_attributes: PathAttributes,
    client: Option<Weak<dyn TransportObject>>,
    tap_hook: Option<EdgeTapHook>,
}

impl BlockEdge {
    #[must_use]
    pub fn new(
        client_id: ObjectId,
        client_index: EdgeIndex,
        capacity: BlockCount,
        offset: Lba,
    ) -> Self {
        Self {
            client_id,
            client_index,
            server_id: ObjectId::INVALID,
            server: None,
            server_index: EdgeIndex::INVALID,
            capacity,
            offset,
            geometry: BlockEdgeGeometry::Invalid,
            traffic_priority: TrafficPriority::Invalid,
            medic_priority: MedicActionPriority::Idle,
            client_package: PackageId::Invalid,
            server_package: PackageId::Invalid,
            time_to_become_ready_in_sec: 0,
            hibernation: None,
            path_state: PathState::Invalid,
            path_attributes: PathAttributes::NONE,
            client: None,
            tap_hook: None,
        }
    }

    /// Object that receives events and attribute notifications for this edge.
    #[must_use]
    pub fn with_client(mut self, client: Weak<dyn TransportObject>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: BlockEdgeGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    #[must_use]
    pub fn with_path_attributes(mut self, attributes: PathAttributes) -> Self {
        self.path_attributes = attributes;
        self
    }

    // -------------------------------------------------------------------------
    // Attachment
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn server_index(&self) -> EdgeIndex {
        self.server_index
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.server_index.is_valid()
    }

    /// Handle naming this edge on its server, once attached.
    #[must_use]
    pub fn handle(&self) -> Option<EdgeHandle> {
        match self.server {
            Some(server) if self.is_attached() => Some(EdgeHandle {
                server,
                server_index: self.server_index,
            }),
            _ => None,
        }
    }

    pub(crate) fn mark_attached(&mut self, server: ServerId, server_index: EdgeIndex) {
        self.server = Some(server);
        self.server_index = server_index;
    }

    pub(crate) fn mark_detached(&mut self) {
        self.server = None;
        self.server_index = EdgeIndex::INVALID;
        self.path_state = PathState::Invalid;
    }

    /// The client object, if one was registered and is still alive.
    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn TransportObject>> {
        self.client.as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn has_valid_client(&self) -> bool {
        self.client_id.is_valid()
    }

    // -------------------------------------------------------------------------
    // Path state and attributes
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn path_state(&self) -> PathState {
        self.path_state
    }

    pub fn set_path_state(&mut self, state: PathState) {
        self.path_state = state;
    }

    #[must_use]
    pub fn path_attributes(&self) -> PathAttributes {
        self.path_attributes
    }

    /// OR `attributes` in.
    pub fn set_path_attributes(&mut self, attributes: PathAttributes) {
        self.path_attributes.insert(attributes);
    }

    pub fn clear_path_attributes(&mut self, attributes: PathAttributes) {
        self.path_attributes.remove(attributes);
    }

    /// Replace only the bits under `mask`.
    pub fn set_path_attributes_masked(&mut self, value: PathAttributes, mask: PathAttributes) {
        self.path_attributes = self.path_attributes.with_masked(value, mask);
    }

    #[must_use]
    pub fn ignores_offset(&self) -> bool {
        self.path_attributes.ignores_offset()
    }

    // -------------------------------------------------------------------------
    // Extent predicates
    // -------------------------------------------------------------------------

    /// Start of the extent in server coordinates; zero with ignore-offset.
    #[must_use]
    pub fn block_offset(&self) -> Lba {
        if self.ignores_offset() {
            0
        } else {
            self.offset
        }
    }

    /// Exclusive end of the extent.
    #[must_use]
    pub fn end_lba(&self) -> Lba {
        self.block_offset().saturating_add(self.capacity)
    }

    #[must_use]
    pub fn is_lba_in_extent(&self, lba: Lba) -> bool {
        self.block_offset() <= lba && lba < self.end_lba()
    }

    /// `[lba, lba + blocks)` shares at least one block with the extent.
    #[must_use]
    pub fn overlaps(&self, lba: Lba, blocks: BlockCount) -> bool {
        blocks > 0 && lba < self.end_lba() && self.block_offset() < lba.saturating_add(blocks)
    }

    /// The whole extent lies below `lba`.
    #[must_use]
    pub fn is_below(&self, lba: Lba) -> bool {
        self.end_lba() <= lba
    }

    /// The whole extent lies above `lba`.
    #[must_use]
    pub fn is_above(&self, lba: Lba) -> bool {
        self.block_offset() > lba
    }

    // -------------------------------------------------------------------------
    // Geometry and hooks
    // -------------------------------------------------------------------------

    pub fn negotiate_block_size(&self) -> Result<NegotiatedBlockSize, TransportError> {
        self.geometry.negotiate()
    }

    pub fn set_tap_hook(&mut self, hook: EdgeTapHook) {
        self.tap_hook = Some(hook);
    }

    pub fn remove_tap_hook(&mut self) {
        self.tap_hook = None;
    }

    #[must_use]
    pub fn tap_hook(&self) -> Option<EdgeTapHook> {
        self.tap_hook.clone()
    }

    #[must_use]
    pub fn info(&self) -> EdgeInfo {
        EdgeInfo {
            client_id: self.client_id,
            client_index: self.client_index,
            server_id: self.server_id,
            server_index: self.server_index,
            capacity: self.capacity,
            offset: self.offset,
            geometry: self.geometry,
            path_state: self.path_state,
            path_attributes: self.path_attributes,
            traffic_priority: self.traffic_priority,
            medic_priority: self.medic_priority,
            client_package: self.client_package,
            server_package: self.server_package,
            time_to_become_ready_in_sec: self.time_to_become_ready_in_sec,
            hibernation: self.hibernation,
            has_tap_hook: self.tap_hook.is_some(),
        }
    }
}

impl fmt::Debug for BlockEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockEdge")
            .field("client_id", &self.client_id)
            .field("client_index", &self.client_index)
            .field("server_id", &self.server_id)
            .field("server_index", &self.server_index)
            .field("capacity", &self.capacity)
            .field("offset", &self.offset)
            .field("geometry", &self.geometry)
            .field("path_state", &self.path_state)
            .field("path_attributes", &self.path_attributes)
            .field("has_tap_hook", &self.tap_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Serializable snapshot of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub client_id: ObjectId,
    pub client_index: EdgeIndex,
    pub server_id: ObjectId,
    pub server_index: EdgeIndex,
    pub capacity: BlockCount,
    pub offset: Lba,
    pub geometry: BlockEdgeGeometry,
    pub path_state: PathState,
    pub path_attributes: PathAttributes,
    pub traffic_priority: TrafficPriority,
    pub medic_priority: MedicActionPriority,
    pub client_package: PackageId,
    pub server_package: PackageId,
    pub time_to_become_ready_in_sec: u64,
    pub hibernation: Option<HibernationInfo>,
    pub has_tap_hook: bool,
}
