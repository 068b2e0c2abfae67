//! # Storage Events
//!
//! Defines the event value that flows through the event service, its
//! delivery state machine, and the payload variants carried across edges.

use serde::{Deserialize, Serialize};
use shared_types::{BlockCount, EdgeHandle, EventStatus, Lba, ObjectId, ServerId};
use std::fmt;

use crate::stack::{EventStack, EventStackFrame, StackError};

/// Identifier of one event allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventType {
    #[default]
    Invalid,
    DataRequest,
    PermitRequest,
    SparingRequest,
    CopyRequest,
    AbortCopyRequest,
    VerifyReport,
    EventLog,
    DownloadRequest,
    AttributeChanged,
    EdgeStateChange,
    IoWaitingOnQueue,
}

impl EventType {
    /// Types that a transport server forwards to its client edges.
    #[must_use]
    pub fn is_edge_deliverable(self) -> bool {
        matches!(
            self,
            EventType::DataRequest
                | EventType::PermitRequest
                | EventType::SparingRequest
                | EventType::CopyRequest
                | EventType::AbortCopyRequest
                | EventType::VerifyReport
                | EventType::EventLog
                | EventType::DownloadRequest
        )
    }
}

/// Delivery state.
///
/// ```text
/// Invalid ──► Queued ──► InProgress ──► Completed
///               │            │
///               └────────────┴────────► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventState {
    #[default]
    Invalid,
    Queued,
    InProgress,
    Completed,
    Canceled,
}

impl EventState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, EventState::Completed | EventState::Canceled)
    }

    #[must_use]
    pub fn can_transition_to(self, next: EventState) -> bool {
        use EventState::*;
        match (self, next) {
            (Invalid, Queued) | (Invalid, Completed) => true,
            (Queued, InProgress) | (Queued, Canceled) | (Queued, Completed) => true,
            (InProgress, Queued) | (InProgress, Completed) | (InProgress, Canceled) => true,
            _ => false,
        }
    }
}

/// Event flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct EventFlags(pub u32);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    /// The receiver refused the request.
    pub const DENY: EventFlags = EventFlags(0x1);
    /// A user-visible region was found inside the extent.
    pub const USER_DATA: EventFlags = EventFlags(0x2);

    #[must_use]
    pub fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Background operation a permit request asks clearance for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PermitEventType {
    #[default]
    Invalid,
    Zero,
    Verify,
    Rebuild,
    Copy,
    Rekey,
}

/// Request for clearance to run a background operation over an extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitRequest {
    pub event_type: PermitEventType,
    pub object_id: ObjectId,
    pub is_start: bool,
    pub is_end: bool,
    pub beyond_capacity: bool,
    pub top_lba: Lba,
    pub unconsumed_block_count: BlockCount,
}

impl Default for PermitRequest {
    fn default() -> Self {
        Self {
            event_type: PermitEventType::Invalid,
            object_id: ObjectId::INVALID,
            is_start: false,
            is_end: false,
            beyond_capacity: false,
            top_lba: 0,
            unconsumed_block_count: 0,
        }
    }
}

/// Kind of data request raised upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DataEventType {
    #[default]
    Invalid,
    MarkNeedsRebuild,
    MarkVerify,
    MarkIncompleteWriteVerify,
    Remap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DataRequest {
    pub data_event_type: DataEventType,
}

/// Error tallies reported at the end of a verify pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VerifyErrorCounts {
    pub correctable_single_bit_crc: u32,
    pub uncorrectable_single_bit_crc: u32,
    pub correctable_multi_bit_crc: u32,
    pub uncorrectable_multi_bit_crc: u32,
    pub correctable_write_stamp: u32,
    pub uncorrectable_write_stamp: u32,
    pub correctable_time_stamp: u32,
    pub uncorrectable_time_stamp: u32,
    pub correctable_shed_stamp: u32,
    pub uncorrectable_shed_stamp: u32,
    pub correctable_coherency: u32,
    pub uncorrectable_coherency: u32,
    pub correctable_media: u32,
    pub uncorrectable_media: u32,
}

impl VerifyErrorCounts {
    #[must_use]
    pub fn total_uncorrectable(&self) -> u64 {
        [
            self.uncorrectable_single_bit_crc,
            self.uncorrectable_multi_bit_crc,
            self.uncorrectable_write_stamp,
            self.uncorrectable_time_stamp,
            self.uncorrectable_shed_stamp,
            self.uncorrectable_coherency,
            self.uncorrectable_media,
        ]
        .iter()
        .map(|&n| u64::from(n))
        .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VerifyReport {
    pub pass_completed: bool,
    pub error_counts: VerifyErrorCounts,
    pub data_disks: u16,
}

/// Physical location of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DriveLocation {
    pub bus: u32,
    pub enclosure: u32,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventLogType {
    #[default]
    Invalid,
    RebuildStarted,
    RebuildCompleted,
    CopyStarted,
    CopyCompleted,
    VerifyStarted,
    VerifyCompleted,
    ZeroStarted,
    ZeroCompleted,
}

/// Request to write an event-log entry on behalf of a downstream object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogRequest {
    pub log_type: EventLogType,
    pub verify_flags: u32,
    pub source_pvd_id: ObjectId,
    pub source_location: DriveLocation,
    pub destination_pvd_id: ObjectId,
    pub destination_location: DriveLocation,
    pub adjusted_position: u32,
}

impl Default for EventLogRequest {
    fn default() -> Self {
        Self {
            log_type: EventLogType::Invalid,
            verify_flags: 0,
            source_pvd_id: ObjectId::INVALID,
            source_location: DriveLocation::default(),
            destination_pvd_id: ObjectId::INVALID,
            destination_location: DriveLocation::default(),
            adjusted_position: 0,
        }
    }
}

/// Tagged payload union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventPayload {
    #[default]
    None,
    PermitRequest(PermitRequest),
    DataRequest(DataRequest),
    VerifyReport(VerifyReport),
    EventLogRequest(EventLogRequest),
}

// =============================================================================
// EVENT
// =============================================================================

/// A notification travelling across the edge graph.
#[derive(Debug)]
pub struct Event {
    id: EventId,
    event_type: EventType,
    pub(crate) state: EventState,
    status: EventStatus,
    flags: EventFlags,
    server: Option<ServerId>,
    object_id: ObjectId,
    edge: Option<EdgeHandle>,
    stack: EventStack,
    payload: EventPayload,
}

impl Event {
    /// A fresh event in the `Invalid` state.
    #[must_use]
    pub fn new(id: EventId, event_type: EventType) -> Self {
        Self {
            id,
            event_type,
            state: EventState::Invalid,
            status: EventStatus::Invalid,
            flags: EventFlags::NONE,
            server: None,
            object_id: ObjectId::INVALID,
            edge: None,
            stack: EventStack::new(),
            payload: EventPayload::None,
        }
    }

    pub(crate) fn reset(&mut self, id: EventId, event_type: EventType) {
        self.id = id;
        self.event_type = event_type;
        self.state = EventState::Invalid;
        self.status = EventStatus::Invalid;
        self.flags = EventFlags::NONE;
        self.server = None;
        self.object_id = ObjectId::INVALID;
        self.edge = None;
        self.stack.clear();
        self.payload = EventPayload::None;
    }

    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn set_event_type(&mut self, event_type: EventType) {
        self.event_type = event_type;
    }

    #[must_use]
    pub fn state(&self) -> EventState {
        self.state
    }

    #[must_use]
    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn set_status(&mut self, status: EventStatus) {
        self.status = status;
    }

    #[must_use]
    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: EventFlags) {
        self.flags = EventFlags(self.flags.0 | flags.0);
    }

    /// Server the next dispatch delivers to.
    #[must_use]
    pub fn server(&self) -> Option<ServerId> {
        self.server
    }

    /// Object owning [`server`](Self::server).
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Point the event at a transport server for its next dispatch.
    pub fn set_target(&mut self, server: ServerId, object_id: ObjectId) {
        self.server = Some(server);
        self.object_id = object_id;
    }

    /// Edge the event was last delivered over.
    #[must_use]
    pub fn edge(&self) -> Option<EdgeHandle> {
        self.edge
    }

    pub fn set_edge(&mut self, edge: EdgeHandle) {
        self.edge = Some(edge);
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut EventPayload {
        &mut self.payload
    }

    pub fn set_payload(&mut self, payload: EventPayload) {
        self.payload = payload;
    }

    #[must_use]
    pub fn permit_request(&self) -> Option<&PermitRequest> {
        match &self.payload {
            EventPayload::PermitRequest(request) => Some(request),
            _ => None,
        }
    }

    pub fn permit_request_mut(&mut self) -> Option<&mut PermitRequest> {
        match &mut self.payload {
            EventPayload::PermitRequest(request) => Some(request),
            _ => None,
        }
    }

    #[must_use]
    pub fn stack(&self) -> &EventStack {
        &self.stack
    }

    /// Push a frame for a new hop.
    pub fn push_frame(&mut self, frame: EventStackFrame) -> Result<(), StackError> {
        self.stack.push(frame)
    }

    /// Pop the current frame without running its completion.
    pub fn pop_frame(&mut self) -> Option<EventStackFrame> {
        self.stack.pop()
    }

    #[must_use]
    pub fn current_frame(&self) -> Option<&EventStackFrame> {
        self.stack.current()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut EventStackFrame> {
        self.stack.current_mut()
    }

    /// Extent of the current frame.
    #[must_use]
    pub fn extent(&self) -> Option<(Lba, BlockCount)> {
        self.stack.current().map(EventStackFrame::extent)
    }

    /// No frame, invalid start address, or empty extent.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.stack.current().map_or(true, EventStackFrame::is_malformed)
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.state == EventState::Canceled
    }

    /// Move to `next` if the state machine allows it.
    pub(crate) fn transition(&mut self, next: EventState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Mark the event canceled. Only queued or in-progress events qualify.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.transition(EventState::Canceled) {
            self.status = EventStatus::Canceled;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use EventState::*;
        assert!(Invalid.can_transition_to(Queued));
        assert!(Queued.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Queued));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Queued.can_transition_to(Canceled));
        assert!(InProgress.can_transition_to(Canceled));

        assert!(!Invalid.can_transition_to(Canceled));
        assert!(!Completed.can_transition_to(Queued));
        assert!(!Canceled.can_transition_to(InProgress));
    }

    #[test]
    fn test_cancel_requires_live_event() {
        let mut event = Event::new(EventId(1), EventType::PermitRequest);
        assert!(!event.cancel());
        assert!(event.transition(EventState::Queued));
        assert!(event.cancel());
        assert_eq!(event.status(), EventStatus::Canceled);
        assert!(event.is_canceled());
    }

    #[test]
    fn test_edge_deliverable_types() {
        assert!(EventType::PermitRequest.is_edge_deliverable());
        assert!(EventType::DownloadRequest.is_edge_deliverable());
        assert!(!EventType::AttributeChanged.is_edge_deliverable());
        assert!(!EventType::Invalid.is_edge_deliverable());
    }

    #[test]
    fn test_malformed_without_frame() {
        let mut event = Event::new(EventId(2), EventType::VerifyReport);
        assert!(event.is_malformed());
        event.push_frame(EventStackFrame::new(0, 64)).unwrap();
        assert!(!event.is_malformed());
        assert_eq!(event.extent(), Some((0, 64)));
    }

    #[test]
    fn test_flags_accumulate() {
        let mut event = Event::new(EventId(3), EventType::DataRequest);
        event.set_flags(EventFlags::DENY);
        event.set_flags(EventFlags::USER_DATA);
        assert!(event.flags().contains(EventFlags::DENY));
        assert!(event.flags().contains(EventFlags::USER_DATA));
    }

    #[test]
    fn test_permit_payload_access() {
        let mut event = Event::new(EventId(4), EventType::PermitRequest);
        assert!(event.permit_request().is_none());
        event.set_payload(EventPayload::PermitRequest(PermitRequest {
            event_type: PermitEventType::Rebuild,
            ..PermitRequest::default()
        }));
        event.permit_request_mut().unwrap().unconsumed_block_count = 12;
        assert_eq!(event.permit_request().unwrap().unconsumed_block_count, 12);
    }

    #[test]
    fn test_verify_error_totals() {
        let counts = VerifyErrorCounts {
            uncorrectable_media: 2,
            uncorrectable_coherency: 3,
            correctable_media: 100,
            ..VerifyErrorCounts::default()
        };
        assert_eq!(counts.total_uncorrectable(), 5);
    }
}
