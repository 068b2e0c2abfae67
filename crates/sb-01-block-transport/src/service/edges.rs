//! Edge registry operations of a transport server.

use shared_types::{
    BlockCount, EdgeHandle, EdgeIndex, Lba, LifecycleState, ObjectId, PathState,
};
use std::sync::Arc;
use storage_telemetry::{log_edge_event, log_server_event};

use crate::domain::{
    BlockEdge, CapacityPlacement, EdgeInfo, EdgeTapHook, HibernationInfo, LogicalDriveState,
    LogicalErrorCounts, LogicalErrorType, NegotiatedBlockSize, PathAttributes, PlacementPolicy,
};
use crate::error::TransportError;
use crate::metrics::TransportMetrics;
use crate::ports::TransportObject;
use crate::service::server::BlockTransportServer;

/// An attribute change to report to a client once the registry is unlocked.
type AttributeNotice = (Arc<dyn TransportObject>, EdgeHandle, PathAttributes);

impl BlockTransportServer {
    // -------------------------------------------------------------------------
    // Attach / detach
    // -------------------------------------------------------------------------

    /// Attach `edge`. Its path state follows the owner's lifecycle.
    pub fn attach_edge(&self, edge: BlockEdge) -> Result<EdgeHandle, TransportError> {
        let path_state = PathState::for_lifecycle(self.lifecycle_state());
        let client = edge.client_id;
        let (offset, capacity) = (edge.offset, edge.capacity);

        let handle = self
            .registry
            .write()
            .attach(self.id, self.owner_id, edge, path_state)
            .inspect_err(|error| {
                log_server_event!(debug, self.id, "Attach refused", client = %client, %error);
            })?;

        TransportMetrics::bump(&self.metrics.edges_attached);
        log_edge_event!(
            debug,
            self.id,
            handle.server_index,
            "Edge attached",
            client = %client,
            offset = offset,
            capacity = capacity,
            ?path_state
        );
        Ok(handle)
    }

    /// Detach the edge at `index` and hand it back.
    pub fn detach_edge(&self, index: EdgeIndex) -> Result<BlockEdge, TransportError> {
        let edge = self.registry.write().detach(index)?;
        TransportMetrics::bump(&self.metrics.edges_detached);
        log_edge_event!(debug, self.id, index, "Edge detached", client = %edge.client_id);
        Ok(edge)
    }

    /// Detach whichever edge `client` attached.
    pub fn detach_client_edge(&self, client: ObjectId) -> Result<BlockEdge, TransportError> {
        let index = self
            .registry
            .read()
            .iter()
            .find(|edge| edge.client_id == client)
            .map(BlockEdge::server_index)
            .ok_or(TransportError::EdgeNotAttached(EdgeIndex::INVALID))?;
        self.detach_edge(index)
    }

    /// Refresh the edge's path state from the owner's lifecycle and return it.
    pub fn open_edge(&self, index: EdgeIndex) -> Result<PathState, TransportError> {
        let path_state = PathState::for_lifecycle(self.lifecycle_state());
        let mut registry = self.registry.write();
        let edge = registry
            .get_mut(index)
            .ok_or(TransportError::EdgeNotAttached(index))?;
        edge.set_path_state(path_state);
        Ok(path_state)
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn edge_info(&self, index: EdgeIndex) -> Result<EdgeInfo, TransportError> {
        self.registry
            .read()
            .get(index)
            .map(BlockEdge::info)
            .ok_or(TransportError::EdgeNotAttached(index))
    }

    /// Snapshots of every edge in address order.
    #[must_use]
    pub fn edges(&self) -> Vec<EdgeInfo> {
        self.registry.read().iter().map(BlockEdge::info).collect()
    }

    pub fn edge_path_state(&self, index: EdgeIndex) -> Result<PathState, TransportError> {
        self.registry
            .read()
            .get(index)
            .map(BlockEdge::path_state)
            .ok_or(TransportError::EdgeNotAttached(index))
    }

    pub fn negotiate_block_size(
        &self,
        index: EdgeIndex,
    ) -> Result<NegotiatedBlockSize, TransportError> {
        self.registry
            .read()
            .get(index)
            .ok_or(TransportError::EdgeNotAttached(index))?
            .negotiate_block_size()
    }

    pub fn set_time_to_become_ready(
        &self,
        client: ObjectId,
        seconds: u64,
    ) -> Result<(), TransportError> {
        let mut registry = self.registry.write();
        let edge = registry
            .find_client_edge_mut(client)
            .ok_or(TransportError::EdgeNotAttached(EdgeIndex::INVALID))?;
        edge.time_to_become_ready_in_sec = seconds;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Path state
    // -------------------------------------------------------------------------

    /// Move the server and every edge to the path state of `lifecycle`.
    ///
    /// Entering ENABLED releases work that queued while the path was in
    /// SLUMBER.
    pub fn update_path_state(&self, lifecycle: LifecycleState) {
        let path_state = PathState::for_lifecycle(lifecycle);
        let released = {
            let mut state = self.admission.lock();
            let previous = state.path_state;
            state.path_state = path_state;
            if previous != path_state {
                log_server_event!(
                    debug,
                    self.id,
                    "Path state changed",
                    from = ?previous,
                    to = ?path_state
                );
            }
            if path_state == PathState::Enabled && !state.flags.is_gated() {
                self.restart_locked(&mut state)
            } else {
                Vec::new()
            }
        };
        for edge in self.registry.write().iter_mut() {
            edge.set_path_state(path_state);
        }
        self.dispatch_released(released);
    }

    // -------------------------------------------------------------------------
    // Path attributes
    // -------------------------------------------------------------------------

    /// OR `attributes` into one edge.
    pub fn set_path_attributes(
        &self,
        index: EdgeIndex,
        attributes: PathAttributes,
    ) -> Result<(), TransportError> {
        self.update_edge_attributes(index, |edge| edge.set_path_attributes(attributes))
    }

    pub fn clear_path_attributes(
        &self,
        index: EdgeIndex,
        attributes: PathAttributes,
    ) -> Result<(), TransportError> {
        self.update_edge_attributes(index, |edge| edge.clear_path_attributes(attributes))
    }

    /// Replace the bits of one edge under `mask`.
    pub fn set_path_attributes_masked(
        &self,
        index: EdgeIndex,
        value: PathAttributes,
        mask: PathAttributes,
    ) -> Result<(), TransportError> {
        self.update_edge_attributes(index, |edge| edge.set_path_attributes_masked(value, mask))
    }

    pub fn set_path_attributes_all(&self, attributes: PathAttributes) {
        self.update_all_attributes(|edge| edge.set_path_attributes(attributes));
    }

    pub fn clear_path_attributes_all(&self, attributes: PathAttributes) {
        self.update_all_attributes(|edge| edge.clear_path_attributes(attributes));
    }

    /// Replace the bits under `mask` on every edge.
    pub fn propagate_path_attributes(&self, value: PathAttributes, mask: PathAttributes) {
        self.update_all_attributes(|edge| edge.set_path_attributes_masked(value, mask));
    }

    fn update_edge_attributes<F>(&self, index: EdgeIndex, update: F) -> Result<(), TransportError>
    where
        F: FnOnce(&mut BlockEdge),
    {
        let notice = {
            let mut registry = self.registry.write();
            let edge = registry
                .get_mut(index)
                .ok_or(TransportError::EdgeNotAttached(index))?;
            apply_attributes(edge, update)
        };
        notify(notice.into_iter());
        Ok(())
    }

    fn update_all_attributes<F>(&self, update: F)
    where
        F: Fn(&mut BlockEdge),
    {
        let notices: Vec<AttributeNotice> = {
            let mut registry = self.registry.write();
            registry
                .iter_mut()
                .filter_map(|edge| apply_attributes(edge, &update))
                .collect()
        };
        notify(notices.into_iter());
    }

    // -------------------------------------------------------------------------
    // Hibernation
    // -------------------------------------------------------------------------

    /// `client` reports that it has entered hibernation.
    pub fn client_hibernating(
        &self,
        client: ObjectId,
        info: HibernationInfo,
    ) -> Result<(), TransportError> {
        let mut registry = self.registry.write();
        let edge = registry
            .find_client_edge_mut(client)
            .ok_or(TransportError::EdgeNotAttached(EdgeIndex::INVALID))?;
        edge.set_path_attributes(PathAttributes::CLIENT_IS_HIBERNATING);
        edge.hibernation = Some(info);
        log_edge_event!(
            debug,
            self.id,
            edge.server_index(),
            "Client hibernating",
            client = %client,
            max_latency_sec = info.max_latency_time_in_sec
        );
        Ok(())
    }

    pub fn exit_hibernation(&self, client: ObjectId) -> Result<(), TransportError> {
        let mut registry = self.registry.write();
        let edge = registry
            .find_client_edge_mut(client)
            .ok_or(TransportError::EdgeNotAttached(EdgeIndex::INVALID))?;
        edge.clear_path_attributes(PathAttributes::CLIENT_IS_HIBERNATING);
        edge.hibernation = None;
        Ok(())
    }

    /// Every client edge reports hibernation. False without clients.
    #[must_use]
    pub fn all_clients_hibernating(&self) -> bool {
        let registry = self.registry.read();
        let mut clients = registry.iter().filter(|e| e.has_valid_client()).peekable();
        clients.peek().is_some()
            && clients.all(|e| {
                e.path_attributes()
                    .contains(PathAttributes::CLIENT_IS_HIBERNATING)
            })
    }

    // -------------------------------------------------------------------------
    // Logical drive reporting
    // -------------------------------------------------------------------------

    pub fn update_logical_error_stats(&self, error: LogicalErrorType) {
        self.report.lock().logical_errors.record(error);
    }

    pub fn clear_logical_errors(&self) {
        self.report.lock().logical_errors = LogicalErrorCounts::default();
    }

    #[must_use]
    pub fn logical_error_counts(&self) -> LogicalErrorCounts {
        self.report.lock().logical_errors
    }

    #[must_use]
    pub fn logical_drive_state(&self) -> LogicalDriveState {
        self.report.lock().logical_drive_state
    }

    /// Record the drive state and reflect faults on every edge.
    pub fn logical_drive_state_changed(&self, drive_state: LogicalDriveState) {
        self.report.lock().logical_drive_state = drive_state;
        log_server_event!(info, self.id, "Logical drive state changed", ?drive_state);
        match drive_state {
            LogicalDriveState::Online => {
                self.clear_path_attributes_all(PathAttributes::FAULT_MASK);
            }
            LogicalDriveState::FailedLinkFault => {
                self.propagate_path_attributes(
                    PathAttributes::LINK_FAULT,
                    PathAttributes::FAULT_MASK,
                );
            }
            LogicalDriveState::FailedDriveFault => {
                self.propagate_path_attributes(
                    PathAttributes::DRIVE_FAULT,
                    PathAttributes::FAULT_MASK,
                );
            }
            LogicalDriveState::FailedEol => {
                self.set_path_attributes_all(PathAttributes::END_OF_LIFE);
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------------
    // Tap hooks
    // -------------------------------------------------------------------------

    pub fn set_tap_hook(&self, index: EdgeIndex, hook: EdgeTapHook) -> Result<(), TransportError> {
        let mut registry = self.registry.write();
        let edge = registry
            .get_mut(index)
            .ok_or(TransportError::EdgeNotAttached(index))?;
        edge.set_tap_hook(hook);
        Ok(())
    }

    pub fn remove_tap_hook(&self, index: EdgeIndex) -> Result<(), TransportError> {
        let mut registry = self.registry.write();
        let edge = registry
            .get_mut(index)
            .ok_or(TransportError::EdgeNotAttached(index))?;
        edge.remove_tap_hook();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Extent queries
    // -------------------------------------------------------------------------

    pub fn validate_capacity(
        &self,
        capacity: BlockCount,
        policy: PlacementPolicy,
        ignore_offset: bool,
    ) -> Result<CapacityPlacement, TransportError> {
        self.registry
            .read()
            .validate_capacity(capacity, policy, ignore_offset)
    }

    #[must_use]
    pub fn max_unused_extent_size(&self) -> BlockCount {
        self.registry.read().max_unused_extent_size()
    }

    #[must_use]
    pub fn is_lba_range_consumed(&self, lba: Lba, blocks: BlockCount) -> bool {
        self.registry.read().is_lba_range_consumed(lba, blocks)
    }

    #[must_use]
    pub fn find_next_consumed_lba(&self, lba: Lba) -> Option<Lba> {
        self.registry.read().find_next_consumed_lba(lba)
    }

    #[must_use]
    pub fn get_end_of_extent(&self, lba: Lba, blocks: BlockCount) -> Option<Lba> {
        self.registry.read().get_end_of_extent(lba, blocks)
    }

    #[must_use]
    pub fn server_index_for_lba(&self, lba: Lba) -> Option<EdgeIndex> {
        self.registry.read().server_index_for_lba(lba)
    }

    /// Highest client offset and highest client end.
    pub fn minimum_capacity_required(&self) -> Result<(Lba, BlockCount), TransportError> {
        self.registry
            .read()
            .minimum_capacity_required()
            .ok_or_else(|| TransportError::InvalidRequest("no client edges attached".to_string()))
    }
}

/// Run `update` and report the change if any bit moved.
fn apply_attributes<F>(edge: &mut BlockEdge, update: F) -> Option<AttributeNotice>
where
    F: FnOnce(&mut BlockEdge),
{
    let before = edge.path_attributes();
    update(edge);
    let after = edge.path_attributes();
    if before == after {
        return None;
    }
    Some((edge.client()?, edge.handle()?, after))
}

fn notify(notices: impl Iterator<Item = AttributeNotice>) {
    for (client, handle, attributes) in notices {
        client.path_attributes_changed(handle, attributes);
    }
}
