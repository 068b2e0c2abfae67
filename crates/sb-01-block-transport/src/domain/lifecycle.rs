//! How a pending lifecycle transition drains a server's queues.

use shared_types::{LifecycleState, TransportStatus};

/// Force-completion setting and status applied while draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    /// `None` leaves force completion as it is.
    pub force_completion: Option<bool>,
    /// Status given to every queued packet.
    pub completion_status: TransportStatus,
}

impl DrainPolicy {
    #[must_use]
    pub fn for_state(state: LifecycleState) -> Self {
        let (force_completion, completion_status) = match state {
            LifecycleState::PendingReady => (Some(false), TransportStatus::Busy),
            LifecycleState::PendingActivate => (Some(true), TransportStatus::Busy),
            LifecycleState::PendingHibernate => (Some(false), TransportStatus::Slumber),
            LifecycleState::PendingOffline => (Some(true), TransportStatus::Busy),
            LifecycleState::PendingFail => (Some(true), TransportStatus::Failed),
            LifecycleState::PendingDestroy => (Some(true), TransportStatus::Dead),
            // Not a pending state: leave force completion alone.
            _ => (None, TransportStatus::Busy),
        };
        Self {
            force_completion,
            completion_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_policy_table() {
        let cases = [
            (LifecycleState::PendingReady, Some(false), TransportStatus::Busy),
            (LifecycleState::PendingActivate, Some(true), TransportStatus::Busy),
            (LifecycleState::PendingHibernate, Some(false), TransportStatus::Slumber),
            (LifecycleState::PendingOffline, Some(true), TransportStatus::Busy),
            (LifecycleState::PendingFail, Some(true), TransportStatus::Failed),
            (LifecycleState::PendingDestroy, Some(true), TransportStatus::Dead),
        ];
        for (state, force, status) in cases {
            let policy = DrainPolicy::for_state(state);
            assert_eq!(policy.force_completion, force, "{state:?}");
            assert_eq!(policy.completion_status, status, "{state:?}");
        }
        assert_eq!(DrainPolicy::for_state(LifecycleState::Ready).force_completion, None);
    }
}
