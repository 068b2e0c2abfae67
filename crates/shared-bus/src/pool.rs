//! # Event Pool
//!
//! Bounded free list of [`Event`] allocations. Released events are reset and
//! kept for reuse up to the configured capacity; anything past that is
//! dropped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::{Event, EventId, EventType};

pub struct EventPool {
    free: Mutex<Vec<Event>>,
    capacity: usize,
    next_id: AtomicU64,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
}

impl EventPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Take an event from the free list, or build a new one.
    pub fn allocate(&self, event_type: EventType) -> Event {
        let id = EventId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.allocated.fetch_add(1, Ordering::Relaxed);

        if let Some(mut event) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            event.reset(id, event_type);
            return event;
        }
        Event::new(id, event_type)
    }

    /// Return a finished event.
    pub fn release(&self, event: Event) {
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(event);
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events currently parked on the free list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    #[must_use]
    pub fn allocated_total(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn reused_total(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn released_total(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventState;
    use crate::stack::EventStackFrame;

    #[test]
    fn test_released_event_is_reset_on_reuse() {
        let pool = EventPool::new(4);
        let mut event = pool.allocate(EventType::VerifyReport);
        event.push_frame(EventStackFrame::new(10, 10)).unwrap();
        event.transition(EventState::Queued);
        let first_id = event.id();
        pool.release(event);
        assert_eq!(pool.available(), 1);

        let event = pool.allocate(EventType::PermitRequest);
        assert_ne!(event.id(), first_id);
        assert_eq!(event.event_type(), EventType::PermitRequest);
        assert_eq!(event.state(), EventState::Invalid);
        assert!(event.stack().is_empty());
        assert_eq!(pool.reused_total(), 1);
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = EventPool::new(2);
        let events: Vec<_> = (0..5).map(|_| pool.allocate(EventType::DataRequest)).collect();
        for event in events {
            pool.release(event);
        }
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.released_total(), 5);
        assert_eq!(pool.allocated_total(), 5);
    }
}
