//! # Block Transport Server
//!
//! One per server-side storage object. Holds the edge registry and the
//! admission engine that decides, for every packet sent over an edge,
//! whether it dispatches now, waits on a priority queue, or completes at
//! the door.
//!
//! ```text
//!  send_io(edge, pkt)
//!       │  offset, tap hook
//!       ▼
//!  ┌──────────────┐ gated/over ceiling ┌───────────────────────┐
//!  │  admission   │ ─────────────────► │ URGENT │ NORMAL │ LOW │
//!  └──────┬───────┘                    └───────────┬───────────┘
//!         │ dispatch                               │ restart on completion
//!         ▼                                        │
//!   owner.io_entry(pkt) ── completion ─────────────┘
//! ```
//!
//! ## Locking
//!
//! `admission` guards flags, queues, credit buckets and throttle totals.
//! `registry` guards the edges. The two are never held at the same time.
//!
//! `outstanding`, `gate` and `total_io_credits` are atomics written only
//! while `admission` is held (Release) and read without it (Acquire). A
//! lock-free reader may see a value one transition old; nothing that needs
//! an exact answer reads them outside the lock.

use parking_lot::{Mutex, RwLock};
use shared_bus::{Event, EventService, EventTarget, SendOutcome};
use shared_types::{
    EdgeHandle, EdgeIndex, LifecycleState, LifecycleStatus, ObjectId, PacketPriority, PathState,
    ServerId, TrafficPriority, TransportStatus, PACKET_PRIORITY_QUEUES,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use storage_telemetry::log_server_event;

use crate::domain::{
    BlockEdge, CreditBuckets, EdgeRegistry, IoPacket, LogicalDriveState, LogicalErrorCounts,
    PriorityQueues, ServerFlags, ThrottleState, TransportServerConfig,
};
use crate::error::TransportError;
use crate::metrics::{TransportMetrics, TransportMetricsSnapshot};
use crate::ports::{
    AdmissionOutcome, BlockTransportApi, LifecycleGateway, ThrottleInfo, ThrottleSettings,
    TransportObject,
};
use crate::service::events::ExtentFanout;

/// State guarded by the admission lock.
pub(super) struct AdmissionState {
    pub(super) flags: ServerFlags,
    /// Path state presented to clients.
    pub(super) path_state: PathState,
    pub(super) queues: PriorityQueues,
    pub(super) credits: CreditBuckets,
    pub(super) throttle: ThrottleState,
    pub(super) force_completion_status: TransportStatus,
    pub(super) queue_ratio_addend: u32,
}

/// What the server reports upward about the drive behind it.
#[derive(Default)]
pub(super) struct ObjectReport {
    pub(super) traffic_priority: TrafficPriority,
    pub(super) logical_errors: LogicalErrorCounts,
    pub(super) logical_drive_state: LogicalDriveState,
}

/// Per-object edge registry and I/O admission engine.
pub struct BlockTransportServer {
    pub(super) id: ServerId,
    pub(super) owner_id: ObjectId,
    pub(super) owner: Weak<dyn TransportObject>,
    pub(super) lifecycle: Arc<dyn LifecycleGateway>,
    pub(super) events: Arc<EventService>,
    pub(super) registry: RwLock<EdgeRegistry>,
    pub(super) admission: Mutex<AdmissionState>,
    pub(super) report: Mutex<ObjectReport>,
    /// Dispatched and not yet completed.
    pub(super) outstanding: AtomicU32,
    /// Mirrors `flags.is_gated()`.
    pub(super) gate: AtomicBool,
    /// Mirrors `credits.total()`.
    pub(super) total_io_credits: AtomicU32,
    pub(super) last_io_time_ms: AtomicU64,
    pub(super) metrics: TransportMetrics,
    pub(super) fanout: Arc<ExtentFanout>,
    pub(super) this: Weak<BlockTransportServer>,
}

impl BlockTransportServer {
    /// Create the server for `owner` and register it with the event service.
    pub fn new<O>(
        owner: &Arc<O>,
        lifecycle: Arc<dyn LifecycleGateway>,
        events: Arc<EventService>,
        config: TransportServerConfig,
    ) -> Result<Arc<Self>, TransportError>
    where
        O: TransportObject + 'static,
    {
        config.validate()?;

        let owner_id = owner.object_id();
        let owner_weak: Weak<O> = Arc::downgrade(owner);
        let owner_weak: Weak<dyn TransportObject> = owner_weak;
        let id = ServerId::allocate();

        let mut flags = ServerFlags::NONE;
        if config.tags_enabled {
            flags.insert(ServerFlags::TAGS_ENABLED);
        }
        if config.stack_limit {
            flags.insert(ServerFlags::STACK_LIMIT);
        }
        let addend = if config.degraded_queue_ratio {
            flags.insert(ServerFlags::DEGRADED_QUEUE_RATIO);
            config.queue_ratio_addend
        } else {
            0
        };
        let credits = CreditBuckets::new(addend);
        let total = credits.total();
        let path_state = PathState::for_lifecycle(lifecycle.lifecycle_state(owner_id));

        let server = Arc::new_cyclic(|this: &Weak<Self>| Self {
            id,
            owner_id,
            owner: owner_weak,
            lifecycle,
            events: Arc::clone(&events),
            registry: RwLock::new(EdgeRegistry::new(config.capacity, config.default_offset)),
            admission: Mutex::new(AdmissionState {
                flags,
                path_state,
                queues: PriorityQueues::new(),
                credits,
                throttle: ThrottleState {
                    outstanding_io_max: config.outstanding_io_max,
                    io_throttle_max: config.io_throttle_max,
                    io_credits_max: config.io_credits_max,
                    ..ThrottleState::default()
                },
                force_completion_status: TransportStatus::Busy,
                queue_ratio_addend: config.queue_ratio_addend,
            }),
            report: Mutex::new(ObjectReport::default()),
            outstanding: AtomicU32::new(0),
            gate: AtomicBool::new(false),
            total_io_credits: AtomicU32::new(total),
            last_io_time_ms: AtomicU64::new(0),
            metrics: TransportMetrics::new(),
            fanout: Arc::new(ExtentFanout::new(id, owner_id)),
            this: this.clone(),
        });

        let target: Weak<Self> = Arc::downgrade(&server);
        let target: Weak<dyn EventTarget> = target;
        events.register_target(id, target);

        log_server_event!(
            info,
            id,
            "Transport server created",
            owner = %owner_id,
            capacity = config.capacity,
            outstanding_io_max = config.outstanding_io_max
        );
        Ok(server)
    }

    /// Tear down. Fails while anything is still queued.
    pub fn destroy(&self) -> Result<(), TransportError> {
        let queued = self.admission.lock().queues.total_len();
        if queued > 0 {
            log_server_event!(warn, self.id, "Destroy refused", queued = queued);
            return Err(TransportError::QueuesNotEmpty { queued });
        }
        self.events.unregister_target(self.id);
        log_server_event!(info, self.id, "Transport server destroyed", owner = %self.owner_id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Identity and counters
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> ServerId {
        self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> ObjectId {
        self.owner_id
    }

    #[must_use]
    pub fn outstanding_io_count(&self) -> u32 {
        self.outstanding.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_gated(&self) -> bool {
        self.gate.load(Ordering::Acquire)
    }

    /// Credits left in the current round.
    #[must_use]
    pub fn total_io_credits(&self) -> u32 {
        self.total_io_credits.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn credit_buckets(&self) -> CreditBuckets {
        self.admission.lock().credits.clone()
    }

    #[must_use]
    pub fn flags(&self) -> ServerFlags {
        self.admission.lock().flags
    }

    /// Set flags that do not gate admission.
    pub fn set_flags(&self, flags: ServerFlags) -> Result<(), TransportError> {
        if flags.intersects(ServerFlags::GATING) {
            return Err(TransportError::InvalidRequest(format!(
                "gating flags {flags} are set through hold, flush or force completion"
            )));
        }
        self.admission.lock().flags.insert(flags);
        Ok(())
    }

    /// Clear flags that do not gate admission.
    pub fn clear_flags(&self, flags: ServerFlags) -> Result<(), TransportError> {
        if flags.intersects(ServerFlags::GATING) {
            return Err(TransportError::InvalidRequest(format!(
                "gating flags {flags} are cleared through resume, unflush or force completion"
            )));
        }
        self.admission.lock().flags.remove(flags);
        Ok(())
    }

    /// Server-wide path state.
    #[must_use]
    pub fn path_state(&self) -> PathState {
        self.admission.lock().path_state
    }

    /// Queue lengths indexed LOW, NORMAL, URGENT.
    #[must_use]
    pub fn queue_lengths(&self) -> [usize; PACKET_PRIORITY_QUEUES] {
        self.admission.lock().queues.lengths()
    }

    /// Dispatched and not yet completed packets, indexed LOW, NORMAL, URGENT.
    #[must_use]
    pub fn outstanding_by_priority(&self) -> [u32; PACKET_PRIORITY_QUEUES] {
        let state = self.admission.lock();
        let mut counts = [0; PACKET_PRIORITY_QUEUES];
        for priority in PacketPriority::DESCENDING {
            counts[priority.queue_index()] = state.queues.outstanding(priority);
        }
        counts
    }

    /// Nothing queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.admission.lock().queues.is_empty()
    }

    #[must_use]
    pub fn metrics(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Milliseconds since the epoch at the last dispatch, or as last set.
    #[must_use]
    pub fn last_io_time(&self) -> u64 {
        self.last_io_time_ms.load(Ordering::Relaxed)
    }

    pub fn set_last_io_time(&self, millis: u64) {
        self.last_io_time_ms.store(millis, Ordering::Relaxed);
    }

    pub(super) fn stamp_io_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.set_last_io_time(now);
    }

    // -------------------------------------------------------------------------
    // Capacity
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.registry.read().capacity()
    }

    pub fn set_capacity(&self, capacity: u64) {
        self.registry.write().set_capacity(capacity);
    }

    #[must_use]
    pub fn default_offset(&self) -> u64 {
        self.registry.read().default_offset()
    }

    pub fn set_default_offset(&self, offset: u64) {
        self.registry.write().set_default_offset(offset);
    }

    // -------------------------------------------------------------------------
    // Throttle
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn get_throttle_info(&self) -> ThrottleInfo {
        let state = self.admission.lock();
        ThrottleInfo {
            outstanding_io_count: self.outstanding.load(Ordering::Acquire),
            outstanding_io_max: state.throttle.outstanding_io_max,
            io_throttle_count: state.throttle.io_throttle_count,
            io_throttle_max: state.throttle.io_throttle_max,
            io_credits_max: state.throttle.io_credits_max,
            outstanding_io_credits: state.throttle.outstanding_io_credits,
            queue_length: state.queues.lengths(),
        }
    }

    /// Replace the ceilings. Raising one releases queued work at once.
    pub fn set_throttle_settings(&self, settings: ThrottleSettings) -> Result<(), TransportError> {
        if settings.io_throttle_max == 1 || settings.io_credits_max == 1 {
            return Err(TransportError::InvalidConfig(
                "throttle and credit ceilings must be 0 or at least 2".to_string(),
            ));
        }
        let released = {
            let mut state = self.admission.lock();
            state.throttle.outstanding_io_max = settings.outstanding_io_max;
            state.throttle.io_throttle_max = settings.io_throttle_max;
            state.throttle.io_credits_max = settings.io_credits_max;
            if state.flags.is_gated() {
                Vec::new()
            } else {
                self.restart_locked(&mut state)
            }
        };
        log_server_event!(
            debug,
            self.id,
            "Throttle ceilings changed",
            outstanding_io_max = settings.outstanding_io_max,
            io_throttle_max = settings.io_throttle_max,
            io_credits_max = settings.io_credits_max
        );
        self.dispatch_released(released);
        Ok(())
    }

    /// Give NORMAL `addend` extra credits per round.
    pub fn set_degraded_queue_ratio(&self, addend: u32) {
        let mut state = self.admission.lock();
        state.flags.insert(ServerFlags::DEGRADED_QUEUE_RATIO);
        state.queue_ratio_addend = addend;
        state.credits.set_normal_addend(addend);
    }

    pub fn clear_degraded_queue_ratio(&self) {
        let mut state = self.admission.lock();
        state.flags.remove(ServerFlags::DEGRADED_QUEUE_RATIO);
        state.credits.set_normal_addend(0);
    }

    // -------------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn traffic_priority(&self) -> TrafficPriority {
        self.report.lock().traffic_priority
    }

    pub fn set_traffic_priority(&self, priority: TrafficPriority) {
        self.report.lock().traffic_priority = priority;
    }

    /// Highest traffic priority among this server and its edges.
    #[must_use]
    pub fn highest_traffic_priority(&self) -> TrafficPriority {
        let own = self.traffic_priority();
        self.registry
            .read()
            .iter()
            .fold(own, |best, edge| best.highest(edge.traffic_priority))
    }

    #[must_use]
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.lifecycle_state(self.owner_id)
    }

    /// Publish the gate for lock-free readers. Caller holds `admission`.
    pub(super) fn publish_gate(&self, state: &AdmissionState) {
        self.gate.store(state.flags.is_gated(), Ordering::Release);
    }
}

impl BlockTransportApi for BlockTransportServer {
    fn server_id(&self) -> ServerId {
        self.id
    }

    fn send_io(&self, edge: EdgeIndex, packet: IoPacket) -> AdmissionOutcome {
        BlockTransportServer::send_io(self, edge, packet)
    }

    fn attach_edge(&self, edge: BlockEdge) -> Result<EdgeHandle, TransportError> {
        BlockTransportServer::attach_edge(self, edge)
    }

    fn detach_edge(&self, index: EdgeIndex) -> Result<BlockEdge, TransportError> {
        BlockTransportServer::detach_edge(self, index)
    }

    fn hold(&self) {
        BlockTransportServer::hold(self);
    }

    fn resume(&self) {
        BlockTransportServer::resume(self);
    }

    fn throttle_info(&self) -> ThrottleInfo {
        self.get_throttle_info()
    }

    fn set_throttle_info(&self, settings: ThrottleSettings) -> Result<(), TransportError> {
        self.set_throttle_settings(settings)
    }

    fn drain_all_queues(&self, state: LifecycleState) -> LifecycleStatus {
        BlockTransportServer::drain_all_queues(self, state)
    }

    fn send_event(&self, event: Event) -> SendOutcome {
        BlockTransportServer::send_event(self, event)
    }
}

impl Drop for BlockTransportServer {
    fn drop(&mut self) {
        self.events.unregister_target(self.id);
    }
}
