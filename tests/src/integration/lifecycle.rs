//! # Lifecycle Flows
//!
//! Pending transitions of a server's owner: hibernation and wake-up,
//! failure with force completion, and destroy waiting for clients.

#[cfg(test)]
mod tests {
    use crate::fixtures::{client_edge, status_probe, tracked, Array, WAIT};
    use parking_lot::Mutex;
    use sb_01_block_transport::testing::{MockLifecycle, MockTransportObject};
    use sb_01_block_transport::{
        AdmissionOutcome, BlockTransportServer, LogicalDriveState, PathAttributes,
        TransportError, TransportObject, TransportServerConfig,
    };
    use shared_bus::EventType;
    use shared_types::{
        EdgeIndex, EventStatus, LifecycleState, LifecycleStatus, ObjectId, PacketPriority,
        PathState, TransportStatus,
    };
    use std::sync::Arc;

    struct Node {
        array: Array,
        drive: Arc<MockTransportObject>,
        lifecycle: Arc<MockLifecycle>,
        server: Arc<BlockTransportServer>,
        client: Arc<MockTransportObject>,
    }

    fn node() -> Node {
        let array = Array::start();
        let drive = Arc::new(MockTransportObject::new(ObjectId(0x10)));
        let lifecycle = Arc::new(MockLifecycle::default());
        let server = array.server_with_lifecycle(
            &drive,
            lifecycle.clone(),
            TransportServerConfig::new(2_000).with_outstanding_io_max(2),
        );
        let client = Arc::new(MockTransportObject::new(ObjectId(0x20)));
        server.attach_edge(client_edge(&client, 1_000, 0)).unwrap();
        Node {
            array,
            drive,
            lifecycle,
            server,
            client,
        }
    }

    #[test]
    fn hibernating_server_queues_and_wakes() {
        let n = node();
        let statuses = Arc::new(Mutex::new(Vec::new()));

        n.lifecycle.set_state(LifecycleState::PendingHibernate);
        assert_eq!(
            n.server.pending(LifecycleState::PendingHibernate),
            LifecycleStatus::Done
        );
        assert_eq!(n.server.edge_path_state(EdgeIndex(0)).unwrap(), PathState::Slumber);

        let outcome = n
            .server
            .send_io(EdgeIndex(0), tracked(PacketPriority::Normal, 9, 1, &statuses));
        assert_eq!(outcome, AdmissionOutcome::Queued);
        assert_eq!(n.lifecycle.wakeups(), 1);

        n.lifecycle.set_state(LifecycleState::Ready);
        n.server.update_path_state(LifecycleState::Ready);
        assert_eq!(n.drive.held_lbas(), vec![9]);
        n.drive.complete_all(TransportStatus::Ok);
        assert_eq!(*statuses.lock(), vec![TransportStatus::Ok]);
    }

    #[test]
    fn pending_fail_drains_and_forces_completion() {
        let n = node();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        for lba in 0..4 {
            n.server
                .send_io(EdgeIndex(0), tracked(PacketPriority::Normal, lba, 1, &statuses));
        }
        assert_eq!(n.server.queue_lengths().iter().sum::<usize>(), 2);

        // Two still out with the drive.
        assert_eq!(
            n.server.pending(LifecycleState::PendingFail),
            LifecycleStatus::Pending
        );
        assert_eq!(
            *statuses.lock(),
            vec![TransportStatus::Failed, TransportStatus::Failed]
        );
        assert_eq!(n.server.edge_path_state(EdgeIndex(0)).unwrap(), PathState::Broken);

        n.drive.complete_all(TransportStatus::Ok);
        assert_eq!(
            n.server.pending(LifecycleState::PendingFail),
            LifecycleStatus::Done
        );

        // New work on a broken path is turned away at the edge.
        let outcome = n
            .server
            .send_io(EdgeIndex(0), tracked(PacketPriority::Normal, 7, 1, &statuses));
        assert_eq!(
            outcome,
            AdmissionOutcome::Completed(TransportStatus::EdgeNotEnabled)
        );

        // Coming back lifts force completion and re-enables the path.
        assert_eq!(
            n.server.pending(LifecycleState::PendingReady),
            LifecycleStatus::Done
        );
        assert_eq!(n.server.path_state(), PathState::Enabled);
        let outcome = n
            .server
            .send_io(EdgeIndex(0), tracked(PacketPriority::Normal, 8, 1, &statuses));
        assert_eq!(outcome, AdmissionOutcome::Dispatched);
    }

    #[test]
    fn pending_destroy_waits_for_clients_then_destroys() {
        let n = node();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        for lba in 0..3 {
            n.server
                .send_io(EdgeIndex(0), tracked(PacketPriority::Low, lba, 1, &statuses));
        }
        // LOW may only use three quarters of the ceiling, rounded down to one.
        assert_eq!(
            n.array.topology.destroy(ObjectId(0x10)),
            Err(TransportError::QueuesNotEmpty { queued: 2 })
        );

        n.lifecycle.set_state(LifecycleState::PendingDestroy);
        assert_eq!(
            n.server.pending(LifecycleState::PendingDestroy),
            LifecycleStatus::Pending
        );
        assert_eq!(
            *statuses.lock(),
            vec![TransportStatus::Dead, TransportStatus::Dead]
        );
        n.drive.complete_all(TransportStatus::Ok);

        // Outstanding work is done but the client is still attached.
        assert_eq!(
            n.server.pending(LifecycleState::PendingDestroy),
            LifecycleStatus::Pending
        );
        n.server.detach_client_edge(n.client.object_id()).unwrap();
        assert_eq!(
            n.server.pending(LifecycleState::PendingDestroy),
            LifecycleStatus::Done
        );
        assert_eq!(n.server.drain_event_queue(), LifecycleStatus::Done);
        n.array.topology.destroy(ObjectId(0x10)).unwrap();
        assert!(n.array.topology.is_empty());
    }

    #[test]
    fn destroying_server_turns_events_away() {
        let n = node();
        assert_eq!(n.server.drain_event_queue(), LifecycleStatus::Done);

        let (probe, done) = status_probe();
        let event = n
            .server
            .prepare_event(EventType::PermitRequest, 0, 64, Some(probe))
            .unwrap();
        n.server.send_event(event);
        assert_eq!(done.recv_timeout(WAIT).unwrap(), EventStatus::Busy);
        assert!(n.client.delivered_events().is_empty());
    }

    #[test]
    fn drive_fault_reaches_the_client() {
        let n = node();
        n.server
            .logical_drive_state_changed(LogicalDriveState::FailedDriveFault);
        let changes = n.client.attribute_changes();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].1.contains(PathAttributes::DRIVE_FAULT));

        n.server.logical_drive_state_changed(LogicalDriveState::Online);
        let changes = n.client.attribute_changes();
        assert!(!changes.last().unwrap().1.intersects(PathAttributes::FAULT_MASK));
    }
}
