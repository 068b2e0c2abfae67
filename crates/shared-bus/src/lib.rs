//! # Shared Bus - Storage Event Service
//!
//! Carries cross-object notifications (permit requests, verify reports, data
//! requests, event-log requests) across the block edge graph.
//!
//! ## Components
//!
//! | Module    | Responsibility                                           |
//! |-----------|----------------------------------------------------------|
//! | `events`  | [`Event`] value, delivery state machine, payloads        |
//! | `stack`   | Bounded [`EventStack`] of extent-tracking frames          |
//! | `pool`    | Free list of reusable events                             |
//! | `service` | [`EventService`]: run queue and single dispatch thread   |
//!
//! ## Trampolined Delivery
//!
//! ```text
//!  raise on edge            push frame [0,256)
//!       │
//!       ▼
//!  ┌─────────┐  deliver  ┌──────────────┐  hop frame [0,100)  ┌────────┐
//!  │ service │ ────────► │ server (BTS) │ ──────────────────► │ client │
//!  └─────────┘           └──────────────┘                     └────────┘
//!       ▲                                                          │
//!       │   completion pops hop frame, rewrites parent [100,156)   │
//!       └──────────────────── requeue ◄────────────────────────────┘
//! ```
//!
//! The stack never grows past [`EVENT_STACK_DEPTH`] frames and the run queue
//! never holds more than [`MAX_EVENT_QUEUE_DEPTH`] events, counting the one in
//! flight.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pool;
pub mod service;
pub mod stack;

pub use config::EventServiceConfig;
pub use error::EventServiceError;
pub use events::{
    DataEventType, DataRequest, DriveLocation, Event, EventFlags, EventId, EventLogRequest,
    EventLogType, EventPayload, EventState, EventType, PermitEventType, PermitRequest,
    VerifyErrorCounts, VerifyReport,
};
pub use metrics::{EventServiceMetrics, EventServiceMetricsSnapshot};
pub use pool::EventPool;
pub use service::{EventDisposition, EventService, EventTarget, SendOutcome};
pub use stack::{
    CompletionStatus, EventCompletion, EventStack, EventStackFrame, StackError, EVENT_STACK_DEPTH,
};

/// Upper bound on the run queue depth.
pub const MAX_EVENT_QUEUE_DEPTH: usize = 10_240;
