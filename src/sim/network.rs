//! Network-on-chip boundary.  The fabric itself is not modeled here; components only see a
//! peek/commit receive side and a send that may refuse under backpressure.

use std::collections::{HashMap, VecDeque};

use crate::sim::request::MemRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Llc,
    Mc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub role: NodeRole,
    pub id: usize,
}

impl NodeId {
    pub fn llc(id: usize) -> Self {
        Self { role: NodeRole::Llc, id }
    }

    pub fn mc(id: usize) -> Self {
        Self { role: NodeRole::Mc, id }
    }
}

pub trait Network {
    /// Inject a request toward `dst`.  A refused request is handed back untouched.
    fn send(&mut self, req: MemRequest, src: NodeId, dst: NodeId) -> Result<(), MemRequest>;

    /// Peek at the next request waiting at `node` without removing it.
    fn receive(&self, node: NodeId) -> Option<&MemRequest>;

    /// Commit the receive of the request returned by the last `receive`.
    fn receive_pop(&mut self, node: NodeId) -> Option<MemRequest>;
}

/// Ideal fabric with one bounded FIFO per destination node.
#[derive(Debug)]
pub struct QueueNetwork {
    capacity: usize,
    queues: HashMap<NodeId, VecDeque<MemRequest>>,
    sent: u64,
    refused: u64,
}

impl QueueNetwork {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: HashMap::new(),
            sent: 0,
            refused: 0,
        }
    }

    pub fn pending(&self, node: NodeId) -> usize {
        self.queues.get(&node).map_or(0, VecDeque::len)
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn refused(&self) -> u64 {
        self.refused
    }
}

impl Network for QueueNetwork {
    fn send(&mut self, req: MemRequest, _src: NodeId, dst: NodeId) -> Result<(), MemRequest> {
        let queue = self.queues.entry(dst).or_default();
        if queue.len() >= self.capacity {
            self.refused += 1;
            return Err(req);
        }
        queue.push_back(req);
        self.sent += 1;
        Ok(())
    }

    fn receive(&self, node: NodeId) -> Option<&MemRequest> {
        self.queues.get(&node).and_then(VecDeque::front)
    }

    fn receive_pop(&mut self, node: NodeId) -> Option<MemRequest> {
        self.queues.get_mut(&node).and_then(VecDeque::pop_front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_consume() {
        let mut net = QueueNetwork::new(4);
        net.send(MemRequest::read(1, 0x40), NodeId::llc(0), NodeId::mc(0))
            .unwrap();
        assert_eq!(1, net.receive(NodeId::mc(0)).unwrap().id);
        assert_eq!(1, net.receive(NodeId::mc(0)).unwrap().id);
        assert_eq!(1, net.receive_pop(NodeId::mc(0)).unwrap().id);
        assert!(net.receive(NodeId::mc(0)).is_none());
    }

    #[test]
    fn full_queue_refuses_and_returns_request() {
        let mut net = QueueNetwork::new(1);
        net.send(MemRequest::read(1, 0x40), NodeId::mc(0), NodeId::llc(0))
            .unwrap();
        let back = net
            .send(MemRequest::read(2, 0x80), NodeId::mc(0), NodeId::llc(0))
            .unwrap_err();
        assert_eq!(2, back.id);
        assert_eq!(1, net.refused());
        assert_eq!(1, net.pending(NodeId::llc(0)));
    }
}
