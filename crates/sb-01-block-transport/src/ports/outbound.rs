//! Outbound Ports (Driven Ports)
//!
//! What a transport server needs from the storage object that owns it and
//! from the objects on the client side of its edges.

use parking_lot::Mutex;
use shared_bus::{Event, EventDisposition, EventType};
use shared_types::{BlockCount, EdgeHandle, Lba, LifecycleState, ObjectId, TransportStatus};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::domain::{IoCredits, IoPacket, PathAttributes};
use crate::error::TransportError;

/// A storage object that exports or consumes block edges.
pub trait TransportObject: Send + Sync {
    fn object_id(&self) -> ObjectId;

    /// Dispatched I/O. The object owns the packet and must complete it.
    fn io_entry(&self, packet: IoPacket);

    /// One hop of an event delivered over an edge.
    ///
    /// The current frame of `event` holds the sub-range in edge
    /// coordinates. An error refuses delivery and denies the event.
    fn event_entry(&self, _event: &mut Event) -> Result<EventDisposition, TransportError> {
        Ok(EventDisposition::Complete)
    }

    /// Throttle cost of `packet`. Defaults to its block count.
    fn calc_io_throttle(&self, packet: &IoPacket) -> u64 {
        packet.operation().block_count
    }

    /// Credit cost of `packet`, and whether it must skip the queues.
    fn calc_io_credits(&self, _packet: &IoPacket) -> IoCredits {
        IoCredits::default()
    }

    /// Path attributes on one of this object's edges changed.
    fn path_attributes_changed(&self, _edge: EdgeHandle, _attributes: PathAttributes) {}
}

/// Lifecycle of the object that owns a transport server.
pub trait LifecycleGateway: Send + Sync {
    fn lifecycle_state(&self, object: ObjectId) -> LifecycleState;

    /// Work is queued behind hibernation; the object should wake up.
    fn io_waiting_on_queue(&self, object: ObjectId);
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// One event hop seen by [`MockTransportObject`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredEvent {
    pub event_type: EventType,
    pub lba: Lba,
    pub block_count: BlockCount,
    pub edge: Option<EdgeHandle>,
}

/// Records everything a server hands it.
///
/// Dispatched packets are held until the test completes them, unless the
/// object was built with [`auto_completing`](Self::auto_completing).
pub struct MockTransportObject {
    id: ObjectId,
    auto_complete: bool,
    refuse_events: AtomicBool,
    throttle_cost: Option<u64>,
    credit_cost: Option<u32>,
    do_not_queue: AtomicBool,
    held: Mutex<Vec<IoPacket>>,
    dispatched: AtomicUsize,
    events: Mutex<Vec<DeliveredEvent>>,
    attribute_changes: Mutex<Vec<(EdgeHandle, PathAttributes)>>,
}

impl MockTransportObject {
    #[must_use]
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            auto_complete: false,
            refuse_events: AtomicBool::new(false),
            throttle_cost: None,
            credit_cost: None,
            do_not_queue: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            dispatched: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            attribute_changes: Mutex::new(Vec::new()),
        }
    }

    /// Completes every dispatched packet with `Ok` straight away.
    #[must_use]
    pub fn auto_completing(id: ObjectId) -> Self {
        Self {
            auto_complete: true,
            ..Self::new(id)
        }
    }

    #[must_use]
    pub fn with_costs(mut self, throttle: u64, credits: u32) -> Self {
        self.throttle_cost = Some(throttle);
        self.credit_cost = Some(credits);
        self
    }

    /// Ask for every later packet to bypass the queues.
    pub fn set_do_not_queue(&self, bypass: bool) {
        self.do_not_queue.store(bypass, Ordering::SeqCst);
    }

    pub fn set_refuse_events(&self, refuse: bool) {
        self.refuse_events.store(refuse, Ordering::SeqCst);
    }

    /// Packets dispatched so far, including completed ones.
    #[must_use]
    pub fn dispatched_count(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Packets dispatched and not yet completed by the test.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Lbas of held packets in dispatch order.
    #[must_use]
    pub fn held_lbas(&self) -> Vec<Lba> {
        self.held.lock().iter().map(|p| p.operation().lba).collect()
    }

    /// Complete the oldest held packet. False when nothing is held.
    pub fn complete_next(&self, status: TransportStatus) -> bool {
        let packet = {
            let mut held = self.held.lock();
            if held.is_empty() {
                None
            } else {
                Some(held.remove(0))
            }
        };
        match packet {
            Some(packet) => {
                packet.complete(status);
                true
            }
            None => false,
        }
    }

    /// Complete held packets until none are left, including any dispatched
    /// while completing.
    pub fn complete_all(&self, status: TransportStatus) -> usize {
        let mut completed = 0;
        while self.complete_next(status) {
            completed += 1;
        }
        completed
    }

    #[must_use]
    pub fn delivered_events(&self) -> Vec<DeliveredEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn attribute_changes(&self) -> Vec<(EdgeHandle, PathAttributes)> {
        self.attribute_changes.lock().clone()
    }
}

impl TransportObject for MockTransportObject {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn io_entry(&self, packet: IoPacket) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        if self.auto_complete {
            packet.complete(TransportStatus::Ok);
        } else {
            self.held.lock().push(packet);
        }
    }

    fn event_entry(&self, event: &mut Event) -> Result<EventDisposition, TransportError> {
        if self.refuse_events.load(Ordering::SeqCst) {
            return Err(TransportError::ClientBusy(format!("{} refuses events", self.id)));
        }
        let (lba, block_count) = event.extent().unwrap_or((0, 0));
        self.events.lock().push(DeliveredEvent {
            event_type: event.event_type(),
            lba,
            block_count,
            edge: event.edge(),
        });
        Ok(EventDisposition::Complete)
    }

    fn calc_io_throttle(&self, packet: &IoPacket) -> u64 {
        self.throttle_cost
            .unwrap_or(packet.operation().block_count)
    }

    fn calc_io_credits(&self, _packet: &IoPacket) -> IoCredits {
        let credits = IoCredits::cost(self.credit_cost.unwrap_or(1));
        if self.do_not_queue.load(Ordering::SeqCst) {
            credits.do_not_queue()
        } else {
            credits
        }
    }

    fn path_attributes_changed(&self, edge: EdgeHandle, attributes: PathAttributes) {
        self.attribute_changes.lock().push((edge, attributes));
    }
}

/// Lifecycle gateway with a settable state.
pub struct MockLifecycle {
    state: Mutex<LifecycleState>,
    wakeups: AtomicUsize,
}

impl MockLifecycle {
    #[must_use]
    pub fn new(state: LifecycleState) -> Self {
        Self {
            state: Mutex::new(state),
            wakeups: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: LifecycleState) {
        *self.state.lock() = state;
    }

    /// Number of "I/O waiting on queue" signals received.
    #[must_use]
    pub fn wakeups(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }
}

impl Default for MockLifecycle {
    fn default() -> Self {
        Self::new(LifecycleState::Ready)
    }
}

impl LifecycleGateway for MockLifecycle {
    fn lifecycle_state(&self, _object: ObjectId) -> LifecycleState {
        *self.state.lock()
    }

    fn io_waiting_on_queue(&self, _object: ObjectId) {
        self.wakeups.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockOpcode, BlockOperation};
    use shared_types::PacketPriority;
    use std::sync::Arc;

    fn packet(lba: Lba) -> IoPacket {
        IoPacket::new(
            PacketPriority::Normal,
            BlockOperation::new(BlockOpcode::Read, lba, 4),
        )
    }

    #[test]
    fn test_mock_holds_until_completed() {
        let object = MockTransportObject::new(ObjectId(1));
        let done = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&done);
        object.io_entry(packet(8).with_completion(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(object.held_lbas(), vec![8]);
        assert!(object.complete_next(TransportStatus::Ok));
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!object.complete_next(TransportStatus::Ok));
    }

    #[test]
    fn test_mock_costs() {
        let object = MockTransportObject::new(ObjectId(1)).with_costs(3, 2);
        assert_eq!(object.calc_io_throttle(&packet(0)), 3);
        assert_eq!(object.calc_io_credits(&packet(0)), IoCredits::cost(2));
        object.set_do_not_queue(true);
        assert!(object.calc_io_credits(&packet(0)).do_not_queue);
        let plain = MockTransportObject::new(ObjectId(2));
        assert_eq!(plain.calc_io_throttle(&packet(0)), 4);
        assert_eq!(plain.calc_io_credits(&packet(0)), IoCredits::default());
    }

    #[test]
    fn test_mock_lifecycle() {
        let lifecycle = MockLifecycle::default();
        assert_eq!(lifecycle.lifecycle_state(ObjectId(1)), LifecycleState::Ready);
        lifecycle.set_state(LifecycleState::Hibernate);
        lifecycle.io_waiting_on_queue(ObjectId(1));
        assert_eq!(lifecycle.lifecycle_state(ObjectId(1)), LifecycleState::Hibernate);
        assert_eq!(lifecycle.wakeups(), 1);
    }
}
