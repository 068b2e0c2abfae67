//! Admission, completion and restart of block I/O.
//!
//! Every path that changes `outstanding` or the gate takes the admission
//! lock first. Packets released by a restart are dispatched only after the
//! lock is dropped, so an owner that completes inline never re-enters a
//! held lock.

use shared_types::{
    EdgeHandle, EdgeIndex, LifecycleState, LifecycleStatus, PacketPriority, PathState,
    TransportStatus,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use storage_telemetry::log_server_event;
use tracing::{debug, trace, warn};

use crate::domain::{
    BlockOperationQualifier, BlockOperationStatus, DrainPolicy, EdgeTapHook, IoPacket,
    PacketFlags, PacketId, ServerFlags,
};
use crate::error::TransportError;
use crate::metrics::TransportMetrics;
use crate::ports::{AdmissionOutcome, TransportObject};
use crate::service::server::{AdmissionState, BlockTransportServer};

/// What `send_io` needs from the edge, copied out of the registry lock.
struct EdgeRoute {
    handle: Option<EdgeHandle>,
    capacity: u64,
    block_offset: u64,
    path_state: PathState,
    hook: Option<EdgeTapHook>,
}

impl BlockTransportServer {
    // -------------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------------

    /// Send `packet` over the edge at `index`.
    ///
    /// The packet's lba is in edge coordinates and is rebased onto the
    /// server's extent. The packet is always consumed; anything that cannot
    /// be admitted is completed with a status before this returns.
    pub fn send_io(&self, index: EdgeIndex, mut packet: IoPacket) -> AdmissionOutcome {
        let route = self.registry.read().get(index).map(|edge| EdgeRoute {
            handle: edge.handle(),
            capacity: edge.capacity,
            block_offset: edge.block_offset(),
            path_state: edge.path_state(),
            hook: edge.tap_hook(),
        });
        let Some(route) = route else {
            return self.reject(packet, &TransportError::EdgeNotAttached(index));
        };

        let operation = *packet.operation();
        if operation.lba.saturating_add(operation.block_count) > route.capacity {
            packet.operation_mut().status = BlockOperationStatus::InvalidRequest;
            return self.reject(
                packet,
                &TransportError::BeyondCapacity {
                    lba: operation.lba,
                    blocks: operation.block_count,
                    capacity: route.capacity,
                },
            );
        }
        if !matches!(route.path_state, PathState::Enabled | PathState::Slumber) {
            return self.reject(packet, &TransportError::EdgeNotEnabled(route.path_state));
        }

        packet.operation_mut().lba = operation.lba.saturating_add(route.block_offset);
        if let Some(handle) = route.handle {
            packet.set_edge(handle);
        }

        if let Some(hook) = route.hook {
            packet = match hook(packet) {
                Some(packet) => packet,
                None => {
                    trace!(server = %self.id, edge = %index, "Packet taken by tap hook");
                    return self.record(AdmissionOutcome::Intercepted);
                }
            };
        }

        self.admit_io(packet)
    }

    /// Admit a packet already in server coordinates.
    pub fn admit_io(&self, mut packet: IoPacket) -> AdmissionOutcome {
        let Some(owner) = self.owner.upgrade() else {
            return self.reject(packet, &TransportError::OwnerGone);
        };
        let computed_throttle = owner.calc_io_throttle(&packet);
        let credits = owner.calc_io_credits(&packet);
        let priority = packet.priority();

        let mut state = self.admission.lock();
        state.flags.insert(ServerFlags::IO_IN_PROGRESS);
        packet.throttle_count = state.throttle.throttle_cost(computed_throttle);
        packet.io_credits = state.throttle.credit_cost(credits.cost);

        if state.path_state == PathState::Slumber {
            state.queues.enqueue(packet);
            drop(state);
            log_server_event!(debug, self.id, "I/O queued behind hibernation");
            self.lifecycle.io_waiting_on_queue(self.owner_id);
            return self.record(AdmissionOutcome::Queued);
        }

        if state.flags.contains(ServerFlags::FLUSH_AND_BLOCK) {
            drop(state);
            return self.finish_at_door(packet, TransportStatus::Dead);
        }
        if state.flags.contains(ServerFlags::FORCE_COMPLETION) {
            let status = state.force_completion_status;
            drop(state);
            return self.finish_at_door(packet, status);
        }
        if state.flags.contains(ServerFlags::HOLD) {
            let flags = packet.flags();
            if flags.contains(PacketFlags::MONITOR_OP) || flags.contains(PacketFlags::DO_NOT_HOLD)
            {
                drop(state);
                return self.finish_at_door(packet, TransportStatus::Quiesced);
            }
            state.queues.enqueue(packet);
            drop(state);
            return self.record(AdmissionOutcome::Queued);
        }

        if state.throttle.outstanding_io_max != 0 {
            if credits.do_not_queue && state.throttle.io_credits_max != 0 {
                // Charged for credits only; the throttle never sees it.
                packet.throttle_count = 0;
                self.start_locked(&mut state, &mut packet);
                drop(state);
                trace!(server = %self.id, packet = %packet.id(), "Dispatched past the queues");
                self.dispatch(&owner, packet);
                return AdmissionOutcome::Dispatched;
            }
            if state.throttle.credits_exhausted(packet.io_credits)
                && packet.flags().contains(PacketFlags::ALLOW_FAIL_CONGESTION)
            {
                drop(state);
                let operation = packet.operation_mut();
                operation.status = BlockOperationStatus::IoFailed;
                operation.qualifier = BlockOperationQualifier::Congested;
                TransportMetrics::bump(&self.metrics.congested);
                return self.finish_at_door(packet, TransportStatus::Ok);
            }

            let outstanding = self.outstanding.load(Ordering::Acquire);
            let must_queue = state.queues.has_work_at_or_above(priority)
                || outstanding >= state.throttle.io_max(priority)
                || state
                    .throttle
                    .blocks_admission(packet.throttle_count, packet.io_credits);
            if must_queue {
                state.queues.enqueue(packet);
                drop(state);
                return self.record(AdmissionOutcome::Queued);
            }
        }

        self.start_locked(&mut state, &mut packet);
        drop(state);
        self.dispatch(&owner, packet);
        AdmissionOutcome::Dispatched
    }

    // -------------------------------------------------------------------------
    // Dispatch and completion
    // -------------------------------------------------------------------------

    /// Account for `packet` going out and hook its completion.
    pub(super) fn start_locked(&self, state: &mut AdmissionState, packet: &mut IoPacket) {
        let priority = packet.priority();
        state.queues.mark_dispatched(priority);
        state.credits.charge(priority);
        state
            .throttle
            .acquire(packet.throttle_count, packet.io_credits);
        self.total_io_credits
            .store(state.credits.total(), Ordering::Release);
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let server = self.this.clone();
        packet.push_completion(move |packet: &mut IoPacket| {
            if let Some(server) = server.upgrade() {
                server.io_completed(packet);
            }
        });
    }

    fn dispatch(&self, owner: &Arc<dyn TransportObject>, packet: IoPacket) {
        self.stamp_io_time();
        TransportMetrics::bump(&self.metrics.dispatched);
        trace!(server = %self.id, packet = %packet.id(), lba = packet.operation().lba, "Dispatch");
        owner.io_entry(packet);
    }

    /// Dispatch packets released by a restart. Caller holds no lock.
    pub(super) fn dispatch_released(&self, released: Vec<IoPacket>) {
        if released.is_empty() {
            return;
        }
        TransportMetrics::add(&self.metrics.restarted, released.len());
        match self.owner.upgrade() {
            Some(owner) => {
                for packet in released {
                    self.dispatch(&owner, packet);
                }
            }
            None => {
                for packet in released {
                    packet.complete(TransportStatus::NoObject);
                }
            }
        }
    }

    fn io_completed(&self, packet: &mut IoPacket) {
        let released = {
            let mut state = self.admission.lock();
            state
                .throttle
                .release(packet.throttle_count, packet.io_credits);
            state.queues.mark_completed(packet.priority());
            let decremented = self
                .outstanding
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
            if decremented.is_err() {
                warn!(
                    server = %self.id,
                    packet = %packet.id(),
                    "Completion with nothing outstanding"
                );
                TransportMetrics::bump(&self.metrics.spurious_completions);
            }
            if state.flags.is_gated() {
                Vec::new()
            } else {
                self.restart_locked(&mut state)
            }
        };
        packet.throttle_count = 0;
        packet.io_credits = 0;
        TransportMetrics::bump(&self.metrics.completed);
        self.dispatch_released(released);
    }

    /// Pull queued work that now fits under the ceilings.
    ///
    /// Credit buckets pick the queue: the highest priority with credit and
    /// work goes first, otherwise the highest priority with work. Stops at
    /// the first head that does not fit, keeping FIFO order. A head fits
    /// under the same per-priority outstanding ceiling admission applies;
    /// the throttle may be filled up to its ceiling.
    pub(super) fn restart_locked(&self, state: &mut AdmissionState) -> Vec<IoPacket> {
        let mut released = Vec::new();

        if state.throttle.outstanding_io_max == 0 {
            while let Some(priority) = state.queues.highest_non_empty() {
                let Some(mut packet) = state.queues.dequeue(priority) else {
                    break;
                };
                self.start_locked(state, &mut packet);
                released.push(packet);
            }
            return released;
        }

        while self.outstanding.load(Ordering::Acquire) < state.throttle.outstanding_io_max {
            let with_credit = PacketPriority::DESCENDING
                .into_iter()
                .find(|&p| state.credits.has_credit(p) && state.queues.len(p) > 0);
            let Some(priority) = with_credit.or_else(|| state.queues.highest_non_empty()) else {
                break;
            };
            let Some(head) = state.queues.peek(priority) else {
                break;
            };
            if state
                .throttle
                .blocks_restart(head.throttle_count, head.io_credits)
            {
                break;
            }
            if self.outstanding.load(Ordering::Acquire) >= state.throttle.io_max(priority) {
                break;
            }
            let Some(mut packet) = state.queues.dequeue(priority) else {
                break;
            };
            self.start_locked(state, &mut packet);
            released.push(packet);
        }
        released
    }

    fn record(&self, outcome: AdmissionOutcome) -> AdmissionOutcome {
        self.metrics.record_admission(outcome);
        outcome
    }

    fn finish_at_door(&self, packet: IoPacket, status: TransportStatus) -> AdmissionOutcome {
        trace!(server = %self.id, packet = %packet.id(), ?status, "Completed at admission");
        packet.complete(status);
        self.record(AdmissionOutcome::Completed(status))
    }

    fn reject(&self, packet: IoPacket, error: &TransportError) -> AdmissionOutcome {
        debug!(server = %self.id, packet = %packet.id(), %error, "Packet rejected");
        self.finish_at_door(packet, error.status())
    }

    // -------------------------------------------------------------------------
    // Gate control
    // -------------------------------------------------------------------------

    /// Stop dispatching. New work queues; monitor and DO_NOT_HOLD work
    /// completes QUIESCED.
    pub fn hold(&self) {
        let mut state = self.admission.lock();
        state.flags.insert(ServerFlags::HOLD);
        self.publish_gate(&state);
        drop(state);
        log_server_event!(debug, self.id, "Server held");
    }

    /// Clear HOLD and release whatever now fits.
    pub fn resume(&self) {
        let released = {
            let mut state = self.admission.lock();
            state.flags.remove(ServerFlags::HOLD);
            self.publish_gate(&state);
            if state.flags.is_gated() {
                Vec::new()
            } else {
                self.restart_locked(&mut state)
            }
        };
        log_server_event!(debug, self.id, "Server resumed", released = released.len());
        self.dispatch_released(released);
    }

    /// Block all new work and complete everything queued with DEAD.
    pub fn flush_and_block_for_destroy(&self) {
        let drained = {
            let mut state = self.admission.lock();
            state.flags.insert(ServerFlags::FLUSH_AND_BLOCK);
            self.publish_gate(&state);
            state.queues.drain_all()
        };
        log_server_event!(info, self.id, "Flushed for destroy", drained = drained.len());
        self.complete_drained(drained, TransportStatus::Dead);
    }

    /// Clear FLUSH_AND_BLOCK and release whatever now fits if no other gate is up.
    pub fn unflush(&self) {
        let released = {
            let mut state = self.admission.lock();
            state.flags.remove(ServerFlags::FLUSH_AND_BLOCK);
            self.publish_gate(&state);
            if state.flags.is_gated() {
                Vec::new()
            } else {
                self.restart_locked(&mut state)
            }
        };
        self.dispatch_released(released);
    }

    /// Complete new work with `status` instead of dispatching it.
    pub fn enable_force_completion(&self, status: TransportStatus) {
        let mut state = self.admission.lock();
        state.flags.insert(ServerFlags::FORCE_COMPLETION);
        state.force_completion_status = status;
        self.publish_gate(&state);
    }

    pub fn disable_force_completion(&self) {
        let released = {
            let mut state = self.admission.lock();
            state.flags.remove(ServerFlags::FORCE_COMPLETION);
            self.publish_gate(&state);
            if state.flags.is_gated() {
                Vec::new()
            } else {
                self.restart_locked(&mut state)
            }
        };
        self.dispatch_released(released);
    }

    // -------------------------------------------------------------------------
    // Monitor context
    // -------------------------------------------------------------------------

    /// Complete every queued packet for a pending lifecycle transition.
    ///
    /// PENDING while dispatched work is still out, DONE otherwise.
    pub fn drain_all_queues(&self, lifecycle: LifecycleState) -> LifecycleStatus {
        let policy = DrainPolicy::for_state(lifecycle);
        let (drained, outstanding) = {
            let mut state = self.admission.lock();
            match policy.force_completion {
                Some(true) => {
                    state.flags.insert(ServerFlags::FORCE_COMPLETION);
                    state.force_completion_status = policy.completion_status;
                }
                Some(false) => state.flags.remove(ServerFlags::FORCE_COMPLETION),
                None => {}
            }
            self.publish_gate(&state);
            let outstanding = self.outstanding.load(Ordering::Acquire);
            (state.queues.drain_all(), outstanding)
        };

        if !drained.is_empty() {
            log_server_event!(
                debug,
                self.id,
                "Queues drained",
                ?lifecycle,
                drained = drained.len(),
                status = ?policy.completion_status
            );
        }
        self.complete_drained(drained, policy.completion_status);

        if outstanding > 0 {
            LifecycleStatus::Pending
        } else {
            LifecycleStatus::Done
        }
    }

    /// Drive a pending lifecycle transition one step.
    pub fn pending(&self, lifecycle: LifecycleState) -> LifecycleStatus {
        if lifecycle != LifecycleState::PendingReady {
            self.update_path_state(lifecycle);
        }
        if self.drain_all_queues(lifecycle) == LifecycleStatus::Pending {
            return LifecycleStatus::Pending;
        }
        match lifecycle {
            LifecycleState::PendingDestroy => {
                let attached = self
                    .registry
                    .read()
                    .iter()
                    .filter(|edge| edge.has_valid_client())
                    .count();
                if attached > 0 {
                    trace!(server = %self.id, attached, "Waiting for clients to detach");
                    return LifecycleStatus::Pending;
                }
            }
            LifecycleState::PendingReady => self.update_path_state(lifecycle),
            _ => {}
        }
        LifecycleStatus::Done
    }

    /// Mark a queued packet canceled. It completes at the next
    /// [`process_canceled_packets`](Self::process_canceled_packets).
    pub fn cancel_packet(&self, id: PacketId) -> bool {
        self.admission.lock().queues.mark_canceled(id)
    }

    /// Complete every canceled queued packet with CANCELED.
    pub fn process_canceled_packets(&self) -> usize {
        let canceled = self.admission.lock().queues.take_canceled();
        let count = canceled.len();
        TransportMetrics::add(&self.metrics.canceled, count);
        for packet in canceled {
            packet.complete(TransportStatus::Canceled);
        }
        if count > 0 {
            log_server_event!(debug, self.id, "Canceled packets completed", count = count);
        }
        count
    }

    fn complete_drained(&self, drained: Vec<IoPacket>, status: TransportStatus) {
        TransportMetrics::add(&self.metrics.drained, drained.len());
        for packet in drained {
            packet.complete(status);
        }
    }
}
