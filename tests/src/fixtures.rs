//! Object graph builders shared by the scenarios.

use parking_lot::Mutex;
use sb_01_block_transport::testing::MockLifecycle;
use sb_01_block_transport::{
    BlockEdge, BlockOpcode, BlockOperation, BlockTransportServer, IoPacket, LifecycleGateway,
    TransportObject, TransportServerConfig, TransportTopology,
};
use shared_bus::{
    CompletionStatus, Event, EventCompletion, EventService, EventServiceConfig, EventStackFrame,
};
use shared_types::{
    BlockCount, EdgeIndex, EventStatus, Lba, ObjectId, PacketPriority, TransportStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Weak};
use std::time::Duration;
use storage_telemetry::{init_logging, TelemetryConfig};

pub const WAIT: Duration = Duration::from_secs(5);

/// Install a quiet subscriber once per test binary.
pub fn init_test_logging() {
    let config = TelemetryConfig::for_component("sb-tests", "scenarios")
        .with_log_level("warn")
        .with_json_logs(false);
    // Another test may have installed it already.
    let _ = init_logging(&config);
}

/// One event service and the servers registered on it.
pub struct Array {
    pub events: Arc<EventService>,
    pub topology: Arc<TransportTopology>,
}

impl Array {
    pub fn start() -> Self {
        init_test_logging();
        Self {
            events: EventService::spawn(EventServiceConfig::default())
                .expect("event service starts"),
            topology: Arc::new(TransportTopology::new()),
        }
    }

    /// Create and register a server owned by `owner` with a ready lifecycle.
    pub fn server<O: TransportObject + 'static>(
        &self,
        owner: &Arc<O>,
        config: TransportServerConfig,
    ) -> Arc<BlockTransportServer> {
        self.server_with_lifecycle(owner, Arc::new(MockLifecycle::default()), config)
    }

    pub fn server_with_lifecycle<O: TransportObject + 'static>(
        &self,
        owner: &Arc<O>,
        lifecycle: Arc<dyn LifecycleGateway>,
        config: TransportServerConfig,
    ) -> Arc<BlockTransportServer> {
        let server = BlockTransportServer::new(owner, lifecycle, Arc::clone(&self.events), config)
            .expect("valid server config");
        self.topology
            .register(Arc::clone(&server))
            .expect("one server per object");
        server
    }
}

pub fn downgrade<T: TransportObject + 'static>(object: &Arc<T>) -> Weak<dyn TransportObject> {
    let weak: Weak<T> = Arc::downgrade(object);
    weak
}

/// Edge for `client` over `[offset, offset + capacity)`.
pub fn client_edge<T: TransportObject + 'static>(
    client: &Arc<T>,
    capacity: BlockCount,
    offset: Lba,
) -> BlockEdge {
    BlockEdge::new(client.object_id(), EdgeIndex(0), capacity, offset)
        .with_client(downgrade(client))
}

pub fn read(priority: PacketPriority, lba: Lba, blocks: BlockCount) -> IoPacket {
    IoPacket::new(priority, BlockOperation::new(BlockOpcode::Read, lba, blocks))
}

/// Packet whose final status is pushed into `statuses`.
pub fn tracked(
    priority: PacketPriority,
    lba: Lba,
    blocks: BlockCount,
    statuses: &Arc<Mutex<Vec<TransportStatus>>>,
) -> IoPacket {
    let statuses = Arc::clone(statuses);
    read(priority, lba, blocks)
        .with_completion(move |packet: &mut IoPacket| statuses.lock().push(packet.status()))
}

/// Root event completion reporting the final status.
pub fn status_probe() -> (Arc<dyn EventCompletion>, Receiver<EventStatus>) {
    let (tx, rx) = mpsc::sync_channel(16);
    let probe = move |event: &mut Event, _frame: &EventStackFrame| {
        let _ = tx.send(event.status());
        CompletionStatus::Done
    };
    (Arc::new(probe), rx)
}

/// An object that exports a server of its own and forwards every packet
/// it receives to an edge on a lower server.
pub struct PassThrough {
    id: ObjectId,
    lower: Mutex<Option<(Arc<BlockTransportServer>, EdgeIndex)>>,
    forwarded: AtomicUsize,
}

impl PassThrough {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            lower: Mutex::new(None),
            forwarded: AtomicUsize::new(0),
        }
    }

    pub fn connect(&self, lower: Arc<BlockTransportServer>, edge: EdgeIndex) {
        *self.lower.lock() = Some((lower, edge));
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::SeqCst)
    }
}

impl TransportObject for PassThrough {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn io_entry(&self, parent: IoPacket) {
        let lower = self.lower.lock().clone();
        let Some((server, edge)) = lower else {
            parent.complete(TransportStatus::NoObject);
            return;
        };
        self.forwarded.fetch_add(1, Ordering::SeqCst);
        let operation = *parent.operation();
        let child = IoPacket::new(
            parent.priority(),
            BlockOperation::new(operation.opcode, operation.lba, operation.block_count),
        )
        .with_completion(move |child: &mut IoPacket| {
            let status = child.status();
            parent.complete(status);
        });
        server.send_io(edge, child);
    }
}
