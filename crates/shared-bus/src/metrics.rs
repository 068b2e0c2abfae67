//! Counters for the event dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default, Debug)]
pub struct EventServiceMetrics {
    /// Events accepted onto the run queue by `send`
    pub sent: AtomicU64,
    /// Events rejected by `send` and completed inline
    pub rejected: AtomicU64,
    /// Deliveries made to a target server
    pub dispatched: AtomicU64,
    /// Events put back on the run queue for another hop
    pub requeued: AtomicU64,
    /// Events that reached a terminal state
    pub completed: AtomicU64,
    /// Events marked canceled while queued
    pub canceled: AtomicU64,
}

impl EventServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventServiceMetricsSnapshot {
        EventServiceMetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EventServiceMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventServiceMetricsSnapshot {
    pub sent: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub requeued: u64,
    pub completed: u64,
    pub canceled: u64,
}
