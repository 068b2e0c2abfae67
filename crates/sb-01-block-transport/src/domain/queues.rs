//! Priority queues of held packets.
//!
//! Queued packets live in a slot table keyed by [`PacketId`]; each priority
//! keeps a FIFO of ids into that table. Canceling only marks the slot, the
//! packet stays queued until the owner's monitor context reaps it.

use shared_types::{PacketPriority, PACKET_PRIORITY_QUEUES};
use std::collections::{HashMap, VecDeque};

use crate::domain::packet::{IoPacket, PacketFlags, PacketId};

#[derive(Debug, Default)]
pub struct PriorityQueues {
    queues: [VecDeque<PacketId>; PACKET_PRIORITY_QUEUES],
    slots: HashMap<PacketId, IoPacket>,
    /// Dispatched and not yet completed, per priority.
    outstanding: [u32; PACKET_PRIORITY_QUEUES],
}

impl PriorityQueues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, packet: IoPacket) {
        let id = packet.id();
        self.queues[packet.priority().queue_index()].push_back(id);
        self.slots.insert(id, packet);
    }

    /// Pop the oldest packet of `priority`.
    pub fn dequeue(&mut self, priority: PacketPriority) -> Option<IoPacket> {
        let queue = &mut self.queues[priority.queue_index()];
        while let Some(id) = queue.pop_front() {
            if let Some(packet) = self.slots.remove(&id) {
                return Some(packet);
            }
        }
        None
    }

    /// Oldest packet of `priority`, without removing it.
    #[must_use]
    pub fn peek(&self, priority: PacketPriority) -> Option<&IoPacket> {
        self.queues[priority.queue_index()]
            .iter()
            .find_map(|id| self.slots.get(id))
    }

    #[must_use]
    pub fn len(&self, priority: PacketPriority) -> usize {
        self.queues[priority.queue_index()].len()
    }

    /// Queue lengths indexed LOW, NORMAL, URGENT.
    #[must_use]
    pub fn lengths(&self) -> [usize; PACKET_PRIORITY_QUEUES] {
        [
            self.queues[0].len(),
            self.queues[1].len(),
            self.queues[2].len(),
        ]
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Something is queued at `priority` or above. New work at `priority`
    /// must not overtake it.
    #[must_use]
    pub fn has_work_at_or_above(&self, priority: PacketPriority) -> bool {
        PacketPriority::DESCENDING
            .iter()
            .filter(|&&p| p >= priority.max(PacketPriority::Low))
            .any(|&p| !self.queues[p.queue_index()].is_empty())
    }

    #[must_use]
    pub fn highest_non_empty(&self) -> Option<PacketPriority> {
        PacketPriority::DESCENDING
            .into_iter()
            .find(|p| !self.queues[p.queue_index()].is_empty())
    }

    /// Flag a queued packet canceled. False if it is not queued here.
    pub fn mark_canceled(&mut self, id: PacketId) -> bool {
        match self.slots.get_mut(&id) {
            Some(packet) => {
                packet.set_flags(PacketFlags::CANCELED);
                true
            }
            None => false,
        }
    }

    /// Remove and return every canceled packet.
    pub fn take_canceled(&mut self) -> Vec<IoPacket> {
        let mut canceled = Vec::new();
        for priority in PacketPriority::DESCENDING {
            let queue = &mut self.queues[priority.queue_index()];
            let slots = &mut self.slots;
            queue.retain(|id| match slots.get(id).map(IoPacket::is_canceled) {
                Some(true) => {
                    if let Some(packet) = slots.remove(id) {
                        canceled.push(packet);
                    }
                    false
                }
                Some(false) => true,
                None => false,
            });
        }
        canceled
    }

    /// Remove every queued packet, highest priority first.
    pub fn drain_all(&mut self) -> Vec<IoPacket> {
        let mut drained = Vec::with_capacity(self.slots.len());
        for priority in PacketPriority::DESCENDING {
            while let Some(packet) = self.dequeue(priority) {
                drained.push(packet);
            }
        }
        drained
    }

    pub fn mark_dispatched(&mut self, priority: PacketPriority) {
        let slot = &mut self.outstanding[priority.queue_index()];
        *slot = slot.saturating_add(1);
    }

    pub fn mark_completed(&mut self, priority: PacketPriority) {
        let slot = &mut self.outstanding[priority.queue_index()];
        *slot = slot.saturating_sub(1);
    }

    #[must_use]
    pub fn outstanding(&self, priority: PacketPriority) -> u32 {
        self.outstanding[priority.queue_index()]
    }
}
