//! # Core Scenarios
//!
//! The reference behaviours of the transport bus, driven through the
//! control plane and a running event service:
//!
//! - **A**: LOW work is serviced before NORMAL's next credit round
//! - **B**: an event over `[0, 256)` walks three 100-block client edges
//! - **C**: detaching an edge that is not attached changes nothing
//! - **D**: malformed events complete at once and never reach the run queue

#[cfg(test)]
mod tests {
    use crate::fixtures::{client_edge, status_probe, tracked, Array, WAIT};
    use parking_lot::Mutex;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use sb_01_block_transport::testing::MockTransportObject;
    use sb_01_block_transport::{
        AdmissionOutcome, BlockOpcode, ControlHandler, ControlRequest, ControlResponse,
        PacketFlags, TransportServerConfig,
    };
    use sb_01_block_transport::ipc::{EdgeRequest, IoCommandRequest};
    use shared_bus::{EventType, SendOutcome};
    use shared_types::{
        EdgeIndex, EventStatus, ObjectId, PacketPriority, TransportStatus, LBA_INVALID,
    };
    use std::sync::Arc;

    const DRIVE: ObjectId = ObjectId(0x10);

    fn io_command(priority: PacketPriority, lba: u64) -> ControlRequest {
        ControlRequest::IoCommand(IoCommandRequest {
            server_index: EdgeIndex(0),
            priority,
            opcode: BlockOpcode::Write,
            lba,
            block_count: 1,
            flags: PacketFlags::NONE,
        })
    }

    #[test]
    fn scenario_a_low_priority_not_starved() {
        let array = Array::start();
        let drive = Arc::new(MockTransportObject::new(DRIVE));
        let server = array.server(
            &drive,
            TransportServerConfig::new(10_000).with_outstanding_io_max(1),
        );
        let client = Arc::new(MockTransportObject::new(ObjectId(0x20)));
        server.attach_edge(client_edge(&client, 10_000, 0)).unwrap();
        let handler = ControlHandler::new(Arc::clone(&array.topology));

        let round = server.credit_buckets().round_size();
        assert_eq!(server.total_io_credits(), round);

        for lba in [1, 2, 3] {
            handler
                .execute(DRIVE, io_command(PacketPriority::Normal, lba))
                .unwrap();
        }
        for lba in [101, 102, 103] {
            let response = handler
                .execute(DRIVE, io_command(PacketPriority::Low, lba))
                .unwrap();
            assert!(matches!(
                response,
                ControlResponse::IoSubmitted {
                    outcome: AdmissionOutcome::Queued,
                    ..
                }
            ));
        }

        let mut order = Vec::new();
        while let Some(&lba) = drive.held_lbas().first() {
            order.push(lba);
            drive.complete_next(TransportStatus::Ok);
        }
        let first_low = order.iter().position(|&lba| lba > 100).unwrap();
        let last_normal = order.iter().rposition(|&lba| lba < 100).unwrap();
        assert!(first_low < last_normal, "LOW starved: {order:?}");
        assert_eq!(order.len(), 6);
        assert_eq!(server.outstanding_io_count(), 0);
    }

    #[test]
    fn scenario_b_event_walks_three_edges() {
        let array = Array::start();
        let drive = Arc::new(MockTransportObject::new(DRIVE));
        let server = array.server(&drive, TransportServerConfig::new(1_000));
        let clients: Vec<_> = (0..3u32)
            .map(|i| {
                let client = Arc::new(MockTransportObject::new(ObjectId(0x20 + i)));
                server
                    .attach_edge(client_edge(&client, 100, u64::from(i) * 100))
                    .unwrap();
                client
            })
            .collect();

        let (probe, done) = status_probe();
        let event = server
            .prepare_event(EventType::PermitRequest, 0, 256, Some(probe))
            .unwrap();
        assert_eq!(server.send_event(event), SendOutcome::Queued);
        assert_eq!(done.recv_timeout(WAIT).unwrap(), EventStatus::Ok);

        let delivered: Vec<_> = clients
            .iter()
            .flat_map(|c| c.delivered_events())
            .map(|e| (e.edge.map(|h| h.server_index), e.lba, e.block_count))
            .collect();
        assert_eq!(
            delivered,
            vec![
                (Some(EdgeIndex(0)), 0, 100),
                (Some(EdgeIndex(1)), 0, 100),
                (Some(EdgeIndex(2)), 0, 56),
            ]
        );
        assert_eq!(server.metrics().events_delivered, 3);
    }

    #[test]
    fn scenario_c_detach_unattached_edge() {
        let array = Array::start();
        let drive = Arc::new(MockTransportObject::new(DRIVE));
        let server = array.server(&drive, TransportServerConfig::new(1_000));
        let client = Arc::new(MockTransportObject::new(ObjectId(0x20)));
        server.attach_edge(client_edge(&client, 100, 0)).unwrap();
        let handler = ControlHandler::new(Arc::clone(&array.topology));
        let before = server.edges();

        let status = handler.execute_status(
            DRIVE,
            ControlRequest::DetachEdge(EdgeRequest {
                server_index: EdgeIndex(3),
            }),
        );
        assert_eq!(status, TransportStatus::GenericFailure);
        assert_eq!(server.edges(), before);
        assert_eq!(server.max_unused_extent_size(), 900);
    }

    #[test]
    fn scenario_d_malformed_events_never_queue() {
        let array = Array::start();
        let drive = Arc::new(MockTransportObject::new(DRIVE));
        let server = array.server(&drive, TransportServerConfig::new(1_000));
        let client = Arc::new(MockTransportObject::new(ObjectId(0x20)));
        server.attach_edge(client_edge(&client, 1_000, 0)).unwrap();

        for (lba, blocks) in [(LBA_INVALID, 16), (32, 0)] {
            let (probe, done) = status_probe();
            let event = server
                .prepare_event(EventType::DataRequest, lba, blocks, Some(probe))
                .unwrap();
            let outcome = server.send_event(event);
            assert_eq!(outcome, SendOutcome::Completed(EventStatus::GenericFailure));
            assert_eq!(done.try_recv().unwrap(), EventStatus::GenericFailure);
            assert_eq!(array.events.queue_len(), 0);
        }
        assert!(client.delivered_events().is_empty());
        assert_eq!(array.events.metrics().dispatched, 0);
    }

    /// Random mixed-priority load keeps the admission invariants.
    #[test]
    fn random_load_keeps_credit_and_ceiling_invariants() {
        let array = Array::start();
        let drive = Arc::new(MockTransportObject::new(DRIVE));
        let max = 4;
        let server = array.server(
            &drive,
            TransportServerConfig::new(100_000)
                .with_outstanding_io_max(max)
                .with_degraded_queue_ratio(3),
        );
        let client = Arc::new(MockTransportObject::new(ObjectId(0x20)));
        server.attach_edge(client_edge(&client, 100_000, 0)).unwrap();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let mut rng = StdRng::seed_from_u64(7);
        let priorities = [
            PacketPriority::Low,
            PacketPriority::Normal,
            PacketPriority::Urgent,
        ];

        let mut sent = 0;
        for step in 0..500u64 {
            if rng.gen_bool(0.6) {
                let priority = priorities[rng.gen_range(0..priorities.len())];
                server.send_io(EdgeIndex(0), tracked(priority, step, 1, &statuses));
                sent += 1;
            } else {
                drive.complete_next(TransportStatus::Ok);
            }
            let buckets = server.credit_buckets();
            assert_eq!(buckets.sum(), buckets.total());
            assert!(buckets.total() > 0);
            assert!(server.outstanding_io_count() <= max);
        }
        drive.complete_all(TransportStatus::Ok);

        assert!(server.is_empty());
        assert_eq!(server.outstanding_io_count(), 0);
        let statuses = statuses.lock();
        assert_eq!(statuses.len(), sent);
        assert!(statuses.iter().all(|s| *s == TransportStatus::Ok));
    }
}
