//! # Stacked Servers
//!
//! A pass-through object exports its own server and is itself a client of
//! a drive's server. I/O sent to the upper server is rebased by both edges
//! and completes back up through both admission engines.

#[cfg(test)]
mod tests {
    use crate::fixtures::{client_edge, status_probe, tracked, Array, PassThrough, WAIT};
    use parking_lot::Mutex;
    use sb_01_block_transport::testing::MockTransportObject;
    use sb_01_block_transport::{AdmissionOutcome, BlockTransportServer, TransportServerConfig};
    use shared_bus::EventType;
    use shared_types::{EdgeIndex, EventStatus, ObjectId, PacketPriority, TransportStatus};
    use std::sync::Arc;

    struct Stack {
        array: Array,
        drive: Arc<MockTransportObject>,
        lower: Arc<BlockTransportServer>,
        middle: Arc<PassThrough>,
        upper: Arc<BlockTransportServer>,
        user: Arc<MockTransportObject>,
    }

    /// drive [0, 4000) ← edge at 1000 ← pass-through [0, 500) ← edge at 100 ← user
    fn stack(lower_config: TransportServerConfig) -> Stack {
        let array = Array::start();
        let drive = Arc::new(MockTransportObject::new(ObjectId(0x10)));
        let lower = array.server(&drive, lower_config);

        let middle = Arc::new(PassThrough::new(ObjectId(0x20)));
        let handle = lower.attach_edge(client_edge(&middle, 500, 1_000)).unwrap();
        middle.connect(Arc::clone(&lower), handle.server_index);
        let upper = array.server(&middle, TransportServerConfig::new(500));

        let user = Arc::new(MockTransportObject::new(ObjectId(0x30)));
        upper.attach_edge(client_edge(&user, 200, 100)).unwrap();
        Stack {
            array,
            drive,
            lower,
            middle,
            upper,
            user,
        }
    }

    #[test]
    fn io_is_rebased_through_both_edges() {
        let s = stack(TransportServerConfig::new(4_000));
        let statuses = Arc::new(Mutex::new(Vec::new()));

        let outcome = s
            .upper
            .send_io(EdgeIndex(0), tracked(PacketPriority::Normal, 5, 8, &statuses));
        assert_eq!(outcome, AdmissionOutcome::Dispatched);
        assert_eq!(s.middle.forwarded(), 1);
        assert_eq!(s.drive.held_lbas(), vec![1_105]);
        assert_eq!(s.upper.outstanding_io_count(), 1);
        assert_eq!(s.lower.outstanding_io_count(), 1);

        s.drive.complete_next(TransportStatus::Ok);
        assert_eq!(*statuses.lock(), vec![TransportStatus::Ok]);
        assert_eq!(s.upper.outstanding_io_count(), 0);
        assert_eq!(s.lower.outstanding_io_count(), 0);
    }

    #[test]
    fn held_lower_server_backs_up_the_stack() {
        let s = stack(TransportServerConfig::new(4_000));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        s.lower.hold();

        for lba in 0..3 {
            s.upper
                .send_io(EdgeIndex(0), tracked(PacketPriority::Urgent, lba, 1, &statuses));
        }
        // The upper server dispatched; the lower one holds the work.
        assert_eq!(s.upper.outstanding_io_count(), 3);
        assert_eq!(s.lower.queue_lengths().iter().sum::<usize>(), 3);
        assert_eq!(s.drive.held_count(), 0);

        s.lower.resume();
        assert_eq!(s.drive.held_lbas(), vec![1_100, 1_101, 1_102]);
        s.drive.complete_all(TransportStatus::Ok);
        assert_eq!(statuses.lock().len(), 3);
        assert!(s.upper.is_empty() && s.lower.is_empty());
    }

    #[test]
    fn failure_status_propagates_up() {
        let s = stack(TransportServerConfig::new(4_000));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        s.lower.enable_force_completion(TransportStatus::Failed);

        let outcome = s
            .upper
            .send_io(EdgeIndex(0), tracked(PacketPriority::Normal, 0, 1, &statuses));
        // The upper server dispatched it; the failure came back from below.
        assert_eq!(outcome, AdmissionOutcome::Dispatched);
        assert_eq!(*statuses.lock(), vec![TransportStatus::Failed]);
        assert_eq!(s.upper.outstanding_io_count(), 0);
    }

    #[test]
    fn drive_event_reaches_pass_through_edge_only() {
        let s = stack(TransportServerConfig::new(4_000));
        let (probe, done) = status_probe();

        // Covers the pass-through's extent and a gap behind it.
        let event = s
            .lower
            .prepare_event(EventType::DataRequest, 1_400, 300, Some(probe))
            .unwrap();
        s.lower.send_event(event);
        assert_eq!(done.recv_timeout(WAIT).unwrap(), EventStatus::Ok);
        assert_eq!(s.lower.metrics().events_delivered, 1);
        assert!(s.user.delivered_events().is_empty());
    }

    #[test]
    fn topology_tracks_both_servers() {
        let s = stack(TransportServerConfig::new(4_000));
        assert_eq!(
            s.array.topology.objects(),
            vec![ObjectId(0x10), ObjectId(0x20)]
        );
        s.upper.detach_edge(EdgeIndex(0)).unwrap();
        s.array.topology.destroy(ObjectId(0x20)).unwrap();
        assert_eq!(s.array.topology.len(), 1);
    }
}
