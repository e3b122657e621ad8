use std::collections::{BTreeMap, VecDeque};

use crate::sim::request::MemRequest;

/// Outstanding requests keyed by address, oldest first within an address.
///
/// Timing backends report completions by address only, so a completion always resolves to the
/// oldest request still queued for that address.
#[derive(Debug, Default)]
pub struct AddressQueues {
    map: BTreeMap<u64, VecDeque<MemRequest>>,
    len: usize,
}

impl AddressQueues {
    pub fn push(&mut self, req: MemRequest) {
        self.map.entry(req.addr).or_default().push_back(req);
        self.len += 1;
    }

    pub fn pop_oldest(&mut self, addr: u64) -> Option<MemRequest> {
        let queue = self.map.get_mut(&addr)?;
        let req = queue.pop_front();
        if queue.is_empty() {
            self.map.remove(&addr);
        }
        if req.is_some() {
            self.len -= 1;
        }
        req
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemRequest> {
        self.map.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_address_resolves_oldest_first() {
        let mut queues = AddressQueues::default();
        queues.push(MemRequest::write(1, 0x40));
        queues.push(MemRequest::write(2, 0x80));
        queues.push(MemRequest::write(3, 0x40));
        assert_eq!(3, queues.len());

        assert_eq!(1, queues.pop_oldest(0x40).unwrap().id);
        assert_eq!(3, queues.pop_oldest(0x40).unwrap().id);
        assert!(queues.pop_oldest(0x40).is_none());
        assert_eq!(2, queues.pop_oldest(0x80).unwrap().id);
        assert!(queues.is_empty());
    }
}
