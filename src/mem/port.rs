use std::collections::VecDeque;
use std::fmt::Write;

use log::debug;

use crate::mem::addr_queue::AddressQueues;
use crate::mem::backend::{BackendShape, DramBackend, DramCompletion, DramConfig, FixedLatencyDram};
use crate::mem::mxp::MxpPort;
use crate::sim::request::MemRequest;
use crate::timeq::Cycle;

/// A request the backend is finished with.
#[derive(Debug)]
pub enum PortEvent {
    /// Read data is available; the request goes back toward the requester.
    ReadDone(MemRequest),
    /// Write is complete; the request goes back to its allocator.
    WriteRetired(MemRequest),
}

/// Address-callback backend: completions resolve the oldest outstanding request per address.
pub struct CallbackPort {
    backend: Box<dyn DramBackend>,
    reads: AddressQueues,
    writes: AddressQueues,
    inflight: usize,
}

impl CallbackPort {
    pub fn new(backend: Box<dyn DramBackend>) -> Self {
        Self {
            backend,
            reads: AddressQueues::default(),
            writes: AddressQueues::default(),
            inflight: 0,
        }
    }

    fn try_submit(&mut self, req: MemRequest) -> Result<(), MemRequest> {
        if !self.backend.submit(req.addr, req.is_write()) {
            return Err(req);
        }
        self.inflight += 1;
        if req.is_write() {
            self.writes.push(req);
        } else {
            self.reads.push(req);
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<PortEvent> {
        let DramCompletion { addr, is_write } = self.backend.pop_completion()?;
        let queue = if is_write {
            &mut self.writes
        } else {
            &mut self.reads
        };
        let Some(req) = queue.pop_oldest(addr) else {
            panic!(
                "completion for {} {:#x} matches no outstanding request\n{}",
                if is_write { "write" } else { "read" },
                addr,
                self.dump()
            );
        };
        self.inflight -= 1;
        Some(if is_write {
            PortEvent::WriteRetired(req)
        } else {
            PortEvent::ReadDone(req)
        })
    }

    fn dump(&self) -> String {
        let mut out = format!("in flight: {}\n", self.inflight);
        for (label, queue) in [("reads", &self.reads), ("writes", &self.writes)] {
            let _ = writeln!(out, "{} ({})", label, queue.len());
            for req in queue.iter() {
                let _ = writeln!(out, "  {}", req);
            }
        }
        out
    }
}

/// Transaction-API backend: acceptance is checked before submitting, completions take the first
/// pushed request with the same address.
pub struct TransactionPort {
    backend: Box<dyn DramBackend>,
    pushed: VecDeque<MemRequest>,
    // finished reads held back by `additional_latency`
    staged: VecDeque<(Cycle, MemRequest)>,
    additional_latency: Cycle,
    cycle: Cycle,
}

impl TransactionPort {
    pub fn new(backend: Box<dyn DramBackend>, additional_latency: Cycle) -> Self {
        Self {
            backend,
            pushed: VecDeque::new(),
            staged: VecDeque::new(),
            additional_latency,
            cycle: 0,
        }
    }

    fn try_submit(&mut self, req: MemRequest) -> Result<(), MemRequest> {
        if !self.backend.will_accept(req.addr, req.is_write()) {
            return Err(req);
        }
        assert!(
            self.backend.submit(req.addr, req.is_write()),
            "backend refused {} after accepting it",
            req
        );
        self.pushed.push_back(req);
        Ok(())
    }

    fn poll(&mut self) -> Option<PortEvent> {
        loop {
            if self
                .staged
                .front()
                .is_some_and(|&(ready, _)| ready <= self.cycle)
            {
                let (_, req) = self.staged.pop_front()?;
                return Some(PortEvent::ReadDone(req));
            }

            // first pushed request at this address, whatever the completion's kind
            let DramCompletion { addr, .. } = self.backend.pop_completion()?;
            let pos = self
                .pushed
                .iter()
                .position(|req| req.addr == addr)
                .unwrap_or_else(|| {
                    panic!(
                        "completion for {:#x} matches no pushed request\n{}",
                        addr,
                        self.dump()
                    )
                });
            let req = self.pushed.remove(pos)?;
            if req.is_write() {
                return Some(PortEvent::WriteRetired(req));
            }
            if self.additional_latency == 0 {
                return Some(PortEvent::ReadDone(req));
            }
            debug!(
                "staging {} until cycle {}",
                req,
                self.cycle + self.additional_latency
            );
            self.staged
                .push_back((self.cycle + self.additional_latency, req));
        }
    }

    fn dump(&self) -> String {
        let mut out = format!("pushed ({})\n", self.pushed.len());
        for req in &self.pushed {
            let _ = writeln!(out, "  {}", req);
        }
        let _ = writeln!(out, "staged ({})", self.staged.len());
        for (ready, req) in &self.staged {
            let _ = writeln!(out, "  {} ready @ {}", req, ready);
        }
        out
    }
}

/// Front end to whichever backend serves a memory controller or the expander.
pub enum MemPort {
    Callback(CallbackPort),
    Transaction(TransactionPort),
    Mxp(MxpPort),
}

impl MemPort {
    /// Port over the fixed-latency reference DRAM model.
    pub fn from_config(cfg: &DramConfig) -> Self {
        let backend = Box::new(FixedLatencyDram::new(cfg));
        match cfg.shape {
            BackendShape::Callback => Self::Callback(CallbackPort::new(backend)),
            BackendShape::Transaction => {
                Self::Transaction(TransactionPort::new(backend, cfg.additional_latency))
            }
        }
    }

    /// Non-committing acceptance check, for callers that peek before taking a request.
    pub fn will_accept(&self, req: &MemRequest) -> bool {
        match self {
            Self::Callback(port) => port.backend.will_accept(req.addr, req.is_write()),
            Self::Transaction(port) => port.backend.will_accept(req.addr, req.is_write()),
            // the MXP engine only reports rejection at insertion time
            Self::Mxp(_) => true,
        }
    }

    pub fn try_submit(&mut self, req: MemRequest) -> Result<(), MemRequest> {
        match self {
            Self::Callback(port) => port.try_submit(req),
            Self::Transaction(port) => port.try_submit(req),
            Self::Mxp(port) => port.try_submit(req),
        }
    }

    pub fn tick(&mut self) {
        match self {
            Self::Callback(port) => port.backend.tick(),
            Self::Transaction(port) => {
                port.backend.tick();
                port.cycle += 1;
            }
            Self::Mxp(port) => port.tick(),
        }
    }

    /// Next finished request, if any.  Call until `None` once per tick.
    pub fn poll(&mut self) -> Option<PortEvent> {
        match self {
            Self::Callback(port) => port.poll(),
            Self::Transaction(port) => port.poll(),
            Self::Mxp(port) => port.poll(),
        }
    }

    pub fn outstanding(&self) -> usize {
        match self {
            Self::Callback(port) => port.inflight,
            Self::Transaction(port) => port.pushed.len() + port.staged.len(),
            Self::Mxp(port) => port.outstanding(),
        }
    }

    pub fn dump(&self) -> String {
        match self {
            Self::Callback(port) => port.dump(),
            Self::Transaction(port) => port.dump(),
            Self::Mxp(port) => port.dump(),
        }
    }
}

impl std::fmt::Debug for MemPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Self::Callback(_) => "callback",
            Self::Transaction(_) => "transaction",
            Self::Mxp(_) => "mxp",
        };
        f.debug_struct("MemPort")
            .field("shape", &shape)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
