//! Per-priority credit buckets and throttle ceilings.
//!
//! Every dispatch spends one credit. Priority `p` is refilled with
//! `2^(p-1)` credits (LOW 1, NORMAL 2, URGENT 4) whenever the running total
//! reaches zero, which gives weighted round-robin across priorities when the
//! queues are backed up.

use serde::{Deserialize, Serialize};
use shared_types::{PacketPriority, PACKET_PRIORITY_QUEUES};

/// Refill amount for `priority`, before any degraded-ratio addend.
#[must_use]
pub fn base_credits(priority: PacketPriority) -> u32 {
    match priority {
        PacketPriority::Invalid | PacketPriority::Low => 1,
        PacketPriority::Normal => 2,
        PacketPriority::Urgent => 4,
    }
}

/// Credit buckets, indexed by queue.
///
/// The bucket sum always equals [`total`](Self::total). When the bucket of
/// the dispatching priority is empty the credit is drawn from the highest
/// priority that still has one, so the total reaches zero after exactly one
/// round of dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditBuckets {
    buckets: [u32; PACKET_PRIORITY_QUEUES],
    total: u32,
    normal_addend: u32,
}

impl CreditBuckets {
    /// Full buckets. `normal_addend` is added to NORMAL on each refill.
    #[must_use]
    pub fn new(normal_addend: u32) -> Self {
        let mut credits = Self {
            buckets: [0; PACKET_PRIORITY_QUEUES],
            total: 0,
            normal_addend,
        };
        credits.reset();
        credits
    }

    /// Refill every bucket and recompute the total.
    pub fn reset(&mut self) {
        for priority in PacketPriority::DESCENDING {
            let mut credits = base_credits(priority);
            if priority == PacketPriority::Normal {
                credits = credits.saturating_add(self.normal_addend);
            }
            self.buckets[priority.queue_index()] = credits;
        }
        self.total = self.buckets.iter().sum();
    }

    /// Change the NORMAL addend. Takes effect at the next refill.
    pub fn set_normal_addend(&mut self, addend: u32) {
        self.normal_addend = addend;
    }

    /// Spend one credit on behalf of `priority`, refilling once the round is
    /// used up.
    pub fn charge(&mut self, priority: PacketPriority) {
        let index = priority.queue_index();
        let source = if self.buckets[index] > 0 {
            Some(index)
        } else {
            PacketPriority::DESCENDING
                .iter()
                .map(|p| p.queue_index())
                .find(|&i| self.buckets[i] > 0)
        };
        if let Some(source) = source {
            self.buckets[source] -= 1;
            self.total -= 1;
        }
        if self.total == 0 {
            self.reset();
        }
    }

    #[must_use]
    pub fn has_credit(&self, priority: PacketPriority) -> bool {
        self.buckets[priority.queue_index()] > 0
    }

    #[must_use]
    pub fn bucket(&self, priority: PacketPriority) -> u32 {
        self.buckets[priority.queue_index()]
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn sum(&self) -> u32 {
        self.buckets.iter().sum()
    }

    /// Credits in a freshly refilled round.
    #[must_use]
    pub fn round_size(&self) -> u32 {
        PacketPriority::DESCENDING
            .iter()
            .map(|&p| base_credits(p))
            .sum::<u32>()
            .saturating_add(self.normal_addend)
    }
}

/// Credit charge an owner computes for one packet.
///
/// `do_not_queue` work is charged and dispatched at once, ahead of every
/// queue and ceiling check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCredits {
    pub cost: u32,
    pub do_not_queue: bool,
}

impl IoCredits {
    #[must_use]
    pub fn cost(cost: u32) -> Self {
        Self {
            cost,
            do_not_queue: false,
        }
    }

    #[must_use]
    pub fn do_not_queue(mut self) -> Self {
        self.do_not_queue = true;
        self
    }
}

impl Default for IoCredits {
    fn default() -> Self {
        Self::cost(1)
    }
}

/// Ceilings and running totals that decide whether work may dispatch.
///
/// A ceiling of zero disables that check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThrottleState {
    pub outstanding_io_max: u32,
    pub io_throttle_max: u64,
    pub io_credits_max: u32,
    /// Throttle cost of everything dispatched and not yet completed.
    pub io_throttle_count: u64,
    /// Credit cost of everything dispatched and not yet completed.
    pub outstanding_io_credits: u32,
}

impl ThrottleState {
    /// Outstanding ceiling for `priority`. LOW gets three quarters, never
    /// less than one.
    #[must_use]
    pub fn io_max(&self, priority: PacketPriority) -> u32 {
        match priority {
            PacketPriority::Invalid | PacketPriority::Low => {
                ((self.outstanding_io_max / 4) * 3).max(1)
            }
            _ => self.outstanding_io_max,
        }
    }

    /// Clamp an object-computed throttle cost below the ceiling.
    #[must_use]
    pub fn throttle_cost(&self, computed: u64) -> u64 {
        if self.io_throttle_max == 0 {
            0
        } else {
            computed.min(self.io_throttle_max - 1)
        }
    }

    /// Clamp an object-computed credit cost below the ceiling.
    #[must_use]
    pub fn credit_cost(&self, computed: u32) -> u32 {
        if self.io_credits_max == 0 {
            0
        } else {
            computed.min(self.io_credits_max - 1)
        }
    }

    /// Credits already out have reached the ceiling. Zero-cost work is
    /// never congested.
    #[must_use]
    pub fn credits_exhausted(&self, credit_cost: u32) -> bool {
        self.io_credits_max != 0
            && credit_cost != 0
            && self.outstanding_io_credits >= self.io_credits_max
    }

    /// New work queues once its cost would reach the throttle ceiling.
    #[must_use]
    pub fn throttle_reached(&self, throttle_cost: u64) -> bool {
        self.io_throttle_max != 0
            && self.io_throttle_count.saturating_add(throttle_cost) >= self.io_throttle_max
    }

    /// Queued work is released up to and including the throttle ceiling.
    #[must_use]
    pub fn throttle_exceeded(&self, throttle_cost: u64) -> bool {
        self.io_throttle_max != 0
            && self.io_throttle_count.saturating_add(throttle_cost) > self.io_throttle_max
    }

    /// Whether a packet arriving at the server must queue behind a ceiling.
    #[must_use]
    pub fn blocks_admission(&self, throttle_cost: u64, credit_cost: u32) -> bool {
        self.credits_exhausted(credit_cost) || self.throttle_reached(throttle_cost)
    }

    /// Whether the head of a queue must stay queued during a restart.
    #[must_use]
    pub fn blocks_restart(&self, throttle_cost: u64, credit_cost: u32) -> bool {
        self.throttle_exceeded(throttle_cost) || self.credits_exhausted(credit_cost)
    }

    pub fn acquire(&mut self, throttle_cost: u64, credit_cost: u32) {
        self.io_throttle_count = self.io_throttle_count.saturating_add(throttle_cost);
        self.outstanding_io_credits = self.outstanding_io_credits.saturating_add(credit_cost);
    }

    pub fn release(&mut self, throttle_cost: u64, credit_cost: u32) {
        self.io_throttle_count = self.io_throttle_count.saturating_sub(throttle_cost);
        self.outstanding_io_credits = self.outstanding_io_credits.saturating_sub(credit_cost);
    }
}
