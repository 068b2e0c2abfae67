//! I/O packets travelling over block edges.
//!
//! A packet carries one block operation plus a stack of completion
//! callbacks. Each layer that forwards the packet pushes its own completion;
//! [`IoPacket::complete`] runs them newest first.

use serde::{Deserialize, Serialize};
use shared_types::{BlockCount, EdgeHandle, Lba, PacketPriority, TransportStatus};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique packet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketId(pub u64);

impl PacketId {
    #[must_use]
    pub fn allocate() -> Self {
        PacketId(NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkt:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockOpcode {
    Read,
    Write,
    WriteVerify,
    WriteSame,
    Verify,
    Zero,
}

/// Outcome of the block operation itself, separate from transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockOperationStatus {
    #[default]
    Invalid,
    Success,
    /// Rejected before reaching the server, e.g. past the end of the edge.
    InvalidRequest,
    IoFailed,
}

/// Detail attached to a [`BlockOperationStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockOperationQualifier {
    #[default]
    None,
    /// Turned away because the server was out of I/O credits.
    Congested,
}

/// The block operation a packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOperation {
    pub opcode: BlockOpcode,
    pub lba: Lba,
    pub block_count: BlockCount,
    pub status: BlockOperationStatus,
    pub qualifier: BlockOperationQualifier,
}

impl BlockOperation {
    #[must_use]
    pub fn new(opcode: BlockOpcode, lba: Lba, block_count: BlockCount) -> Self {
        Self {
            opcode,
            lba,
            block_count,
            status: BlockOperationStatus::Invalid,
            qualifier: BlockOperationQualifier::None,
        }
    }

    #[must_use]
    pub fn end_lba(&self) -> Lba {
        self.lba.saturating_add(self.block_count)
    }
}

/// Per-packet behaviour bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PacketFlags(pub u32);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Complete with `Quiesced` instead of waiting out a hold.
    pub const DO_NOT_HOLD: PacketFlags = PacketFlags(0x1);
    /// Issued from the owner's monitor context; never held.
    pub const MONITOR_OP: PacketFlags = PacketFlags(0x2);
    pub const CANCELED: PacketFlags = PacketFlags(0x4);
    /// Fail with `IoFailed`/`Congested` instead of queuing when the server
    /// is out of I/O credits.
    pub const ALLOW_FAIL_CONGESTION: PacketFlags = PacketFlags(0x8);

    #[must_use]
    pub fn contains(self, other: PacketFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

/// Callback run when a packet completes.
pub type PacketCompletion = Box<dyn FnOnce(&mut IoPacket) + Send>;

/// One unit of block I/O.
pub struct IoPacket {
    id: PacketId,
    priority: PacketPriority,
    operation: BlockOperation,
    flags: PacketFlags,
    status: TransportStatus,
    edge: Option<EdgeHandle>,
    /// Throttle cost charged at dispatch.
    pub(crate) throttle_count: u64,
    /// Credit cost charged at dispatch.
    pub(crate) io_credits: u32,
    completions: Vec<PacketCompletion>,
}

impl IoPacket {
    #[must_use]
    pub fn new(priority: PacketPriority, operation: BlockOperation) -> Self {
        Self {
            id: PacketId::allocate(),
            priority,
            operation,
            flags: PacketFlags::NONE,
            status: TransportStatus::Ok,
            edge: None,
            throttle_count: 0,
            io_credits: 0,
            completions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = PacketFlags(self.flags.0 | flags.0);
        self
    }

    /// Push a completion; it runs before any pushed earlier.
    pub fn push_completion<F>(&mut self, completion: F)
    where
        F: FnOnce(&mut IoPacket) + Send + 'static,
    {
        self.completions.push(Box::new(completion));
    }

    #[must_use]
    pub fn with_completion<F>(mut self, completion: F) -> Self
    where
        F: FnOnce(&mut IoPacket) + Send + 'static,
    {
        self.push_completion(completion);
        self
    }

    /// Set the transport status and unwind every completion.
    pub fn complete(mut self, status: TransportStatus) {
        self.status = status;
        while let Some(completion) = self.completions.pop() {
            completion(&mut self);
        }
    }

    #[must_use]
    pub fn id(&self) -> PacketId {
        self.id
    }

    #[must_use]
    pub fn priority(&self) -> PacketPriority {
        self.priority
    }

    #[must_use]
    pub fn operation(&self) -> &BlockOperation {
        &self.operation
    }

    pub fn operation_mut(&mut self) -> &mut BlockOperation {
        &mut self.operation
    }

    #[must_use]
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub(crate) fn set_flags(&mut self, flags: PacketFlags) {
        self.flags = PacketFlags(self.flags.0 | flags.0);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.flags.contains(PacketFlags::CANCELED)
    }

    #[must_use]
    pub fn status(&self) -> TransportStatus {
        self.status
    }

    #[must_use]
    pub fn edge(&self) -> Option<EdgeHandle> {
        self.edge
    }

    pub(crate) fn set_edge(&mut self, edge: EdgeHandle) {
        self.edge = Some(edge);
    }

    #[must_use]
    pub fn completion_depth(&self) -> usize {
        self.completions.len()
    }
}

impl fmt::Debug for IoPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoPacket")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("operation", &self.operation)
            .field("flags", &self.flags)
            .field("status", &self.status)
            .field("edge", &self.edge)
            .field("completions", &self.completions.len())
            .finish()
    }
}
