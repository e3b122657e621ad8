use std::collections::VecDeque;

use crate::link::message::MsgId;

/// One direction of a virtual channel.  Occupancy is counted in credit units: one per message in
/// flit framing, bytes in packet framing.
#[derive(Debug)]
pub struct VcBuffer {
    queue: VecDeque<(MsgId, u32)>,
    used: u32,
    capacity: u32,
    peak: u32,
}

impl VcBuffer {
    pub fn new(capacity: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            used: 0,
            capacity,
            peak: 0,
        }
    }

    pub fn has_room(&self, cost: u32) -> bool {
        self.used + cost <= self.capacity
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.used
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn peak(&self) -> u32 {
        self.peak
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn front(&self) -> Option<MsgId> {
        self.queue.front().map(|&(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = MsgId> + '_ {
        self.queue.iter().map(|&(id, _)| id)
    }

    /// Callers check `has_room` first; pushing past capacity is a flow-control bug.
    pub fn push(&mut self, id: MsgId, cost: u32) {
        assert!(
            self.has_room(cost),
            "VC buffer overflow: {} + {} > {}",
            self.used,
            cost,
            self.capacity
        );
        self.used += cost;
        self.peak = self.peak.max(self.used);
        self.queue.push_back((id, cost));
    }

    pub fn pop(&mut self) -> Option<MsgId> {
        let (id, cost) = self.queue.pop_front()?;
        self.used -= cost;
        Some(id)
    }
}
