//! Counters for transport server activity
//!
//! ## Usage
//!
//! ```ignore
//! let snapshot = server.metrics();
//! println!("dispatched={} queued={}", snapshot.dispatched, snapshot.queued);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::ports::AdmissionOutcome;

/// Per-server counters. Updated lock-free from admission and completion.
#[derive(Default, Debug)]
pub struct TransportMetrics {
    /// Packets handed to the owner's I/O entry
    pub dispatched: AtomicU64,
    /// Packets held on a priority queue at admission
    pub queued: AtomicU64,
    /// Packets completed at admission without dispatch
    pub rejected: AtomicU64,
    /// Packets consumed by an edge tap hook
    pub intercepted: AtomicU64,
    /// Dispatched packets that completed
    pub completed: AtomicU64,
    /// Queued packets released by a restart
    pub restarted: AtomicU64,
    /// Queued packets completed by a drain or flush
    pub drained: AtomicU64,
    /// Queued packets reaped after cancellation
    pub canceled: AtomicU64,
    /// Packets failed at admission because credits ran out
    pub congested: AtomicU64,
    /// Completions that arrived with nothing outstanding
    pub spurious_completions: AtomicU64,
    pub edges_attached: AtomicU64,
    pub edges_detached: AtomicU64,
    /// Event hops handed to a client
    pub events_delivered: AtomicU64,
    /// Event hops refused by a client
    pub events_denied: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count a non-dispatch admission outcome. Dispatches are counted where
    /// the packet reaches the I/O entry.
    pub(crate) fn record_admission(&self, outcome: AdmissionOutcome) {
        let counter = match outcome {
            AdmissionOutcome::Dispatched => return,
            AdmissionOutcome::Queued => &self.queued,
            AdmissionOutcome::Intercepted => &self.intercepted,
            AdmissionOutcome::Completed(_) => &self.rejected,
        };
        Self::bump(counter);
    }

    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            intercepted: self.intercepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            restarted: self.restarted.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            congested: self.congested.load(Ordering::Relaxed),
            spurious_completions: self.spurious_completions.load(Ordering::Relaxed),
            edges_attached: self.edges_attached.load(Ordering::Relaxed),
            edges_detached: self.edges_detached.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_denied: self.events_denied.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportMetricsSnapshot {
    pub dispatched: u64,
    pub queued: u64,
    pub rejected: u64,
    pub intercepted: u64,
    pub completed: u64,
    pub restarted: u64,
    pub drained: u64,
    pub canceled: u64,
    pub congested: u64,
    pub spurious_completions: u64,
    pub edges_attached: u64,
    pub edges_detached: u64,
    pub events_delivered: u64,
    pub events_denied: u64,
}
