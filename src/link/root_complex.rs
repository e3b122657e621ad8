use std::collections::VecDeque;
use std::fmt::Write;

use log::debug;

use crate::link::config::LinkConfig;
use crate::link::engine::{LinkEngine, LinkRole, LinkSide};
use crate::link::message::LinkPool;
use crate::sim::request::{MemRequest, ReqState};

/// Host end of the link.  Requests enter through `insert_request` and come back through
/// `pop_request`, both in FIFO order.
#[derive(Debug)]
pub struct RootComplex {
    pub link: LinkEngine,
    pending: VecDeque<MemRequest>,
    done: VecDeque<MemRequest>,
}

impl RootComplex {
    pub fn new(cfg: &LinkConfig) -> Self {
        Self {
            link: LinkEngine::new("root complex", LinkSide::Host, cfg),
            pending: VecDeque::new(),
            done: VecDeque::new(),
        }
    }

    pub fn insert_request(&mut self, req: MemRequest) {
        debug!("root complex cycle {}: insert {}", self.link.cycle(), req);
        self.pending.push_back(req);
    }

    pub fn pop_request(&mut self) -> Option<MemRequest> {
        self.done.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn done_len(&self) -> usize {
        self.done.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.done.is_empty() && self.link.is_idle()
    }

    pub fn dump(&self, pool: &LinkPool) -> String {
        let mut out = self.link.dump(pool);
        let _ = writeln!(out, "pending ({})", self.pending.len());
        for req in &self.pending {
            let _ = writeln!(out, "  {}", req);
        }
        let _ = writeln!(out, "done ({})", self.done.len());
        for req in &self.done {
            let _ = writeln!(out, "  {}", req);
        }
        out
    }
}

impl LinkRole for RootComplex {
    fn link_mut(&mut self) -> &mut LinkEngine {
        &mut self.link
    }

    fn start_transaction(&mut self, pool: &mut LinkPool) {
        while let Some(mut req) = self.pending.pop_front() {
            req.state = ReqState::LinkPending;
            req.link_entry_cycle = Some(self.link.cycle());
            if let Err(mut req) = self.link.push_outbound(req, pool) {
                req.state = ReqState::LinkEntryStart;
                req.link_entry_cycle = None;
                self.pending.push_front(req);
                break;
            }
        }
    }

    fn end_transaction(&mut self, pool: &mut LinkPool) {
        while let Some(mut req) = self.link.pull_inbound(pool) {
            req.state = ReqState::LinkReturned;
            self.done.push_back(req);
        }
    }
}
