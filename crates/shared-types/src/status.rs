//! # Status Codes and Lifecycle States
//!
//! Failures on the bus surface as a status code on the request or event that
//! failed. These enums are the shared vocabulary for those codes.

use serde::{Deserialize, Serialize};

/// Completion status of a packet or control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u32)]
pub enum TransportStatus {
    #[default]
    Ok = 0,
    Pending = 1,
    MoreProcessingRequired = 2,
    GenericFailure = 3,
    Busy = 4,
    Dead = 5,
    Quiesced = 6,
    Slumber = 7,
    Failed = 8,
    Canceled = 9,
    NotInitialized = 10,
    NoObject = 11,
    EdgeNotEnabled = 12,
    InsufficientResources = 13,
}

impl TransportStatus {
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == TransportStatus::Ok
    }
}

/// Status carried by an event when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u32)]
pub enum EventStatus {
    #[default]
    Invalid = 0,
    Ok = 1,
    GenericFailure = 2,
    NotInitialized = 3,
    Busy = 4,
    Canceled = 5,
    NoUserData = 6,
    InvalidEvent = 7,
}

impl EventStatus {
    /// Whether fan-out across further edges may continue after this status.
    #[must_use]
    pub fn allows_continuation(self) -> bool {
        matches!(self, EventStatus::Ok | EventStatus::NoUserData)
    }
}

/// Lifecycle state of a storage object, as reported by its lifecycle port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Specialize,
    Activate,
    Ready,
    Hibernate,
    Offline,
    Fail,
    Destroy,
    PendingReady,
    PendingActivate,
    PendingHibernate,
    PendingOffline,
    PendingFail,
    PendingDestroy,
}

impl LifecycleState {
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            LifecycleState::PendingReady
                | LifecycleState::PendingActivate
                | LifecycleState::PendingHibernate
                | LifecycleState::PendingOffline
                | LifecycleState::PendingFail
                | LifecycleState::PendingDestroy
        )
    }
}

/// Result of a monitor-context step that may need to run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleStatus {
    Done,
    Pending,
}

/// State of the path from a client into a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PathState {
    #[default]
    Invalid,
    Enabled,
    Disabled,
    Slumber,
    Broken,
    Gone,
}

impl PathState {
    /// Path state that a server in `state` presents to its clients.
    #[must_use]
    pub fn for_lifecycle(state: LifecycleState) -> PathState {
        match state {
            LifecycleState::PendingReady | LifecycleState::Ready => PathState::Enabled,
            LifecycleState::Specialize
            | LifecycleState::PendingActivate
            | LifecycleState::Activate => PathState::Disabled,
            LifecycleState::PendingHibernate | LifecycleState::Hibernate => PathState::Slumber,
            LifecycleState::PendingOffline | LifecycleState::Offline => PathState::Disabled,
            LifecycleState::PendingFail | LifecycleState::Fail => PathState::Broken,
            LifecycleState::PendingDestroy | LifecycleState::Destroy => PathState::Gone,
        }
    }
}
