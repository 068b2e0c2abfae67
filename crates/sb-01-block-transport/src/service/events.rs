//! Event delivery over a server's client edges.
//!
//! An event raised on a server names an extent in server coordinates. Each
//! delivery hands one hop to the lowest client edge overlapping that extent,
//! with the hop frame clipped to the edge. When the hop completes,
//! [`ExtentFanout`] shrinks the parent frame to whatever is left and sends
//! the event back to the server for the next edge. The event service
//! re-queues the event rather than recursing, so any number of edges costs
//! one stack frame at a time.

use shared_bus::{
    CompletionStatus, Event, EventCompletion, EventDisposition, EventFlags, EventStackFrame,
    EventTarget, EventType, SendOutcome,
};
use shared_types::{BlockCount, EdgeHandle, EventStatus, Lba, LifecycleStatus, ObjectId, ServerId};
use std::sync::Arc;
use storage_telemetry::log_server_event;
use tracing::{trace, warn};

use crate::domain::ServerFlags;
use crate::error::TransportError;
use crate::metrics::TransportMetrics;
use crate::ports::TransportObject;
use crate::service::server::BlockTransportServer;

/// Completion of one hop: continue with the rest of the extent, if any.
///
/// The hop frame's `context` carries the original end of the extent in
/// server coordinates.
pub struct ExtentFanout {
    server: ServerId,
    object: ObjectId,
}

impl ExtentFanout {
    pub(crate) fn new(server: ServerId, object: ObjectId) -> Self {
        Self { server, object }
    }
}

impl EventCompletion for ExtentFanout {
    fn on_complete(&self, event: &mut Event, hop: &EventStackFrame) -> CompletionStatus {
        let original_end = hop.context;
        let consumed_end = hop.current_offset.min(original_end);
        if !event.status().allows_continuation() || consumed_end >= original_end {
            return CompletionStatus::Done;
        }
        let Some(parent) = event.current_frame_mut() else {
            return CompletionStatus::Done;
        };
        parent.set_extent(consumed_end, original_end - consumed_end);
        parent.previous_offset = hop.previous_offset;
        parent.current_offset = hop.current_offset;
        event.set_target(self.server, self.object);
        CompletionStatus::MoreProcessingRequired
    }
}

/// The client edge chosen for one hop, copied out of the registry lock.
struct Hop {
    handle: Option<EdgeHandle>,
    client_id: ObjectId,
    client: Option<Arc<dyn TransportObject>>,
    start: Lba,
    end: Lba,
}

impl BlockTransportServer {
    /// Draw an event from the pool, targeted at this server, covering
    /// `[lba, lba + blocks)`. `completion` runs once every hop is done.
    pub fn prepare_event(
        &self,
        event_type: EventType,
        lba: Lba,
        blocks: BlockCount,
        completion: Option<Arc<dyn EventCompletion>>,
    ) -> Result<Event, TransportError> {
        let mut event = self.events.allocate_event(event_type);
        let mut frame = EventStackFrame::new(lba, blocks);
        if let Some(completion) = completion {
            frame = frame.with_completion(completion, 0);
        }
        if let Err(error) = event.push_frame(frame) {
            self.events.release_event(event);
            return Err(error.into());
        }
        event.set_target(self.id, self.owner_id);
        Ok(event)
    }

    /// Raise `event` on this server's client edges.
    pub fn send_event(&self, mut event: Event) -> SendOutcome {
        event.set_target(self.id, self.owner_id);
        self.events.send(event)
    }

    /// Complete further deliveries with BUSY and report PENDING until the
    /// service holds no more events for this server.
    pub fn drain_event_queue(&self) -> LifecycleStatus {
        self.admission
            .lock()
            .flags
            .insert(ServerFlags::COMPLETE_EVENTS_ON_DESTROY);
        let pending = self.events.pending_event_count(self.id);
        if pending > 0 {
            trace!(server = %self.id, pending, "Waiting for events to drain");
            LifecycleStatus::Pending
        } else {
            LifecycleStatus::Done
        }
    }

    /// Cancel events queued for this server.
    pub fn cancel_events(&self) -> usize {
        self.events.cancel_events_for(self.id)
    }

    /// An event is queued for, or being delivered to, this server.
    #[must_use]
    pub fn has_pending_events(&self) -> bool {
        self.events.pending_event_count(self.id) > 0
    }

    fn deliver(&self, event: &mut Event) -> EventDisposition {
        if self
            .admission
            .lock()
            .flags
            .contains(ServerFlags::COMPLETE_EVENTS_ON_DESTROY)
        {
            event.set_status(EventStatus::Busy);
            return EventDisposition::Complete;
        }
        if !event.event_type().is_edge_deliverable() {
            event.set_status(EventStatus::GenericFailure);
            return EventDisposition::Complete;
        }
        let Some((lba, blocks)) = event.extent() else {
            event.set_status(EventStatus::GenericFailure);
            return EventDisposition::Complete;
        };
        let end = lba.saturating_add(blocks);

        let hop = self
            .registry
            .read()
            .first_overlapping_client(lba, blocks)
            .map(|edge| Hop {
                handle: edge.handle(),
                client_id: edge.client_id,
                client: edge.client(),
                start: edge.block_offset(),
                end: edge.end_lba(),
            });
        let Some(hop) = hop else {
            // Nothing delivered yet for this extent means there is no user
            // data behind it.
            let delivered = event
                .current_frame()
                .is_some_and(|frame| frame.current_offset != frame.previous_offset);
            event.set_status(if delivered {
                EventStatus::Ok
            } else {
                EventStatus::NoUserData
            });
            return EventDisposition::Complete;
        };

        let hop_start = lba.max(hop.start);
        let hop_end = end.min(hop.end);
        let frame = EventStackFrame::new(hop_start - hop.start, hop_end - hop_start)
            .with_offsets(hop.start, hop.end)
            .with_completion(Arc::clone(&self.fanout) as Arc<dyn EventCompletion>, end);
        if let Err(error) = event.push_frame(frame) {
            warn!(server = %self.id, event = %event.id(), %error, "Cannot push hop frame");
            event.set_status(EventStatus::GenericFailure);
            return EventDisposition::Complete;
        }
        if let Some(handle) = hop.handle {
            event.set_edge(handle);
        }
        event.set_status(EventStatus::Ok);

        // An edge without a live client object has nobody to notify.
        let Some(client) = hop.client else {
            return EventDisposition::Complete;
        };

        self.events.set_in_flight_object(hop.client_id);
        let result = client.event_entry(event);
        self.events.clear_in_flight_object();

        match result {
            Ok(disposition) => {
                TransportMetrics::bump(&self.metrics.events_delivered);
                if disposition == EventDisposition::Requeue && event.server() == Some(self.id) {
                    // Not retargeted: the retry splits the same extent again.
                    event.pop_frame();
                }
                disposition
            }
            Err(error) => {
                TransportMetrics::bump(&self.metrics.events_denied);
                log_server_event!(
                    debug,
                    self.id,
                    "Client refused event",
                    client = %hop.client_id,
                    event = %event.id(),
                    %error
                );
                event.set_flags(EventFlags::DENY);
                event.set_status(EventStatus::Busy);
                EventDisposition::Complete
            }
        }
    }
}

impl EventTarget for BlockTransportServer {
    fn deliver_event(&self, event: &mut Event) -> EventDisposition {
        self.deliver(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockEdge, IoPacket, TransportServerConfig};
    use crate::ports::{MockLifecycle, MockTransportObject};
    use parking_lot::Mutex;
    use shared_bus::{EventService, EventServiceConfig};
    use shared_types::{EdgeIndex, TransportStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    /// Hands the event back, untouched, a fixed number of times.
    struct RetryingClient {
        id: ObjectId,
        retries: AtomicUsize,
        seen: Mutex<Vec<(Lba, BlockCount, usize)>>,
    }

    impl TransportObject for RetryingClient {
        fn object_id(&self) -> ObjectId {
            self.id
        }

        fn io_entry(&self, packet: IoPacket) {
            packet.complete(TransportStatus::Ok);
        }

        fn event_entry(&self, event: &mut Event) -> Result<EventDisposition, TransportError> {
            let (lba, blocks) = event.extent().unwrap_or((0, 0));
            self.seen.lock().push((lba, blocks, event.stack().depth()));
            let retry = self
                .retries
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(if retry {
                EventDisposition::Requeue
            } else {
                EventDisposition::Complete
            })
        }
    }

    struct Fixture {
        server: Arc<BlockTransportServer>,
        clients: Vec<Arc<MockTransportObject>>,
        _owner: Arc<MockTransportObject>,
    }

    /// A server of 1000 blocks with client edges at the given extents.
    /// The event service is never started; tests drive delivery by hand.
    fn fixture(extents: &[(Lba, BlockCount)]) -> Fixture {
        let owner = Arc::new(MockTransportObject::new(ObjectId(0x100)));
        let events = Arc::new(EventService::new(EventServiceConfig::default()).unwrap());
        let server = BlockTransportServer::new(
            &owner,
            Arc::new(MockLifecycle::default()),
            events,
            TransportServerConfig::new(1_000),
        )
        .unwrap();
        let mut clients = Vec::new();
        for (i, &(offset, capacity)) in extents.iter().enumerate() {
            let id = ObjectId(0x200 + i as u32);
            let client = Arc::new(MockTransportObject::new(id));
            let weak: Weak<MockTransportObject> = Arc::downgrade(&client);
            let weak: Weak<dyn TransportObject> = weak;
            server
                .attach_edge(BlockEdge::new(id, EdgeIndex(0), capacity, offset).with_client(weak))
                .unwrap();
            clients.push(client);
        }
        Fixture {
            server,
            clients,
            _owner: owner,
        }
    }

    fn permit_event(server: &BlockTransportServer, lba: Lba, blocks: BlockCount) -> Event {
        server
            .prepare_event(EventType::PermitRequest, lba, blocks, None)
            .unwrap()
    }

    /// Pop the hop frame and run its completion, as the dispatcher does.
    fn complete_hop(event: &mut Event) -> CompletionStatus {
        let hop = event.pop_frame().unwrap();
        let fanout = ExtentFanout::new(event.server().unwrap(), event.object_id());
        fanout.on_complete(event, &hop)
    }

    #[test]
    fn test_fanout_walks_every_edge() {
        let f = fixture(&[(0, 100), (100, 100), (200, 100)]);
        let mut event = permit_event(&f.server, 0, 256);

        assert_eq!(f.server.deliver_event(&mut event), EventDisposition::Complete);
        assert_eq!(event.extent(), Some((0, 100)));
        assert_eq!(
            complete_hop(&mut event),
            CompletionStatus::MoreProcessingRequired
        );
        assert_eq!(event.extent(), Some((100, 156)));

        f.server.deliver_event(&mut event);
        // Hop frames are in edge coordinates.
        assert_eq!(event.extent(), Some((0, 100)));
        assert_eq!(
            complete_hop(&mut event),
            CompletionStatus::MoreProcessingRequired
        );
        assert_eq!(event.extent(), Some((200, 56)));

        f.server.deliver_event(&mut event);
        assert_eq!(event.extent(), Some((0, 56)));
        assert_eq!(complete_hop(&mut event), CompletionStatus::Done);
        assert_eq!(event.status(), EventStatus::Ok);
        assert_eq!(event.stack().depth(), 1);

        let seen: Vec<_> = f
            .clients
            .iter()
            .map(|c| c.delivered_events()[0].block_count)
            .collect();
        assert_eq!(seen, vec![100, 100, 56]);
        assert_eq!(f.server.metrics().events_delivered, 3);
    }

    #[test]
    fn test_requeue_without_retarget_retries_the_same_hop() {
        let f = fixture(&[]);
        let client = Arc::new(RetryingClient {
            id: ObjectId(0x300),
            retries: AtomicUsize::new(12),
            seen: Mutex::new(Vec::new()),
        });
        let weak: Weak<RetryingClient> = Arc::downgrade(&client);
        let weak: Weak<dyn TransportObject> = weak;
        f.server
            .attach_edge(BlockEdge::new(client.id, EdgeIndex(0), 100, 300).with_client(weak))
            .unwrap();

        let mut event = permit_event(&f.server, 320, 40);
        // More retries than the stack has frames.
        for _ in 0..12 {
            assert_eq!(f.server.deliver_event(&mut event), EventDisposition::Requeue);
            assert_eq!(event.stack().depth(), 1);
            assert_eq!(event.extent(), Some((320, 40)));
        }
        assert_eq!(f.server.deliver_event(&mut event), EventDisposition::Complete);
        assert_eq!(complete_hop(&mut event), CompletionStatus::Done);
        assert_eq!(event.status(), EventStatus::Ok);

        let seen = client.seen.lock();
        assert_eq!(seen.len(), 13);
        assert!(seen.iter().all(|&hop| hop == (20, 40, 2)));
    }

    #[test]
    fn test_no_client_edge_means_no_user_data() {
        let f = fixture(&[(500, 100)]);
        let mut event = permit_event(&f.server, 0, 100);
        assert_eq!(f.server.deliver_event(&mut event), EventDisposition::Complete);
        assert_eq!(event.status(), EventStatus::NoUserData);
    }

    #[test]
    fn test_gap_after_delivery_completes_ok() {
        let f = fixture(&[(0, 50)]);
        let mut event = permit_event(&f.server, 0, 100);
        f.server.deliver_event(&mut event);
        assert_eq!(
            complete_hop(&mut event),
            CompletionStatus::MoreProcessingRequired
        );
        assert_eq!(event.extent(), Some((50, 50)));
        f.server.deliver_event(&mut event);
        assert_eq!(event.status(), EventStatus::Ok);
    }

    #[test]
    fn test_refusal_denies_and_stops() {
        let f = fixture(&[(0, 100), (100, 100)]);
        f.clients[0].set_refuse_events(true);
        let mut event = permit_event(&f.server, 0, 200);
        assert_eq!(f.server.deliver_event(&mut event), EventDisposition::Complete);
        assert!(event.flags().contains(EventFlags::DENY));
        assert_eq!(event.status(), EventStatus::Busy);
        assert_eq!(complete_hop(&mut event), CompletionStatus::Done);
        assert!(f.clients[1].delivered_events().is_empty());
        assert_eq!(f.server.metrics().events_denied, 1);
    }

    #[test]
    fn test_unsupported_type_fails() {
        let f = fixture(&[(0, 100)]);
        let mut event = f
            .server
            .prepare_event(EventType::Invalid, 0, 10, None)
            .unwrap();
        f.server.deliver_event(&mut event);
        assert_eq!(event.status(), EventStatus::GenericFailure);
        assert!(f.clients[0].delivered_events().is_empty());
    }

    #[test]
    fn test_draining_server_completes_busy() {
        let f = fixture(&[(0, 100)]);
        assert_eq!(f.server.drain_event_queue(), LifecycleStatus::Done);
        let mut event = permit_event(&f.server, 0, 10);
        f.server.deliver_event(&mut event);
        assert_eq!(event.status(), EventStatus::Busy);
        assert!(f.clients[0].delivered_events().is_empty());
    }

    #[test]
    fn test_send_before_start_is_not_initialized() {
        let f = fixture(&[(0, 100)]);
        let event = permit_event(&f.server, 0, 10);
        assert_eq!(
            f.server.send_event(event),
            SendOutcome::Completed(EventStatus::NotInitialized)
        );
    }
}
