use std::fmt;

use log::debug;

use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReqKind {
    Read,
    Write,
}

impl ReqKind {
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// Where a request currently is, from the memory controller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReqState {
    #[default]
    New,
    // accepted by the local DIMM backend
    DimmPending,
    // claimed a CME slot, waiting to enter the root complex
    LinkEntryStart,
    // handed to the root complex
    LinkPending,
    // submitted to the device backend
    DeviceStart,
    // device backend finished
    DeviceDone,
    // response travelling back over the link
    LinkReturning,
    // popped from the root complex
    LinkReturned,
    // sent back into the network
    NocFill,
    // write handed back to the allocator
    Retired,
}

/// A memory request owned by the memory subsystem.  The link and router move it around by value;
/// the only place it is given back is `RequestAllocator::free` on write retirement.
#[derive(Debug, PartialEq, Eq)]
pub struct MemRequest {
    pub id: u64,
    pub addr: u64,
    pub kind: ReqKind,
    pub core_id: usize,
    pub thread_id: usize,
    // last-level cache slice the response goes back to
    pub llc_id: usize,
    pub state: ReqState,
    pub insert_cycle: Cycle,
    pub link_entry_cycle: Option<Cycle>,
    pub device_done_cycle: Option<Cycle>,
}

impl MemRequest {
    pub fn new(id: u64, addr: u64, kind: ReqKind) -> Self {
        Self {
            id,
            addr,
            kind,
            core_id: 0,
            thread_id: 0,
            llc_id: 0,
            state: ReqState::New,
            insert_cycle: 0,
            link_entry_cycle: None,
            device_done_cycle: None,
        }
    }

    pub fn read(id: u64, addr: u64) -> Self {
        Self::new(id, addr, ReqKind::Read)
    }

    pub fn write(id: u64, addr: u64) -> Self {
        Self::new(id, addr, ReqKind::Write)
    }

    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }
}

impl fmt::Display for MemRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_write() { "W" } else { "R" };
        write!(f, "req:{} {}@{:#x}", self.id, kind, self.addr)
    }
}

/// Origin allocator of memory requests.  Completed writes are handed back here; nothing else is.
pub trait RequestAllocator {
    fn free(&mut self, core_id: usize, req: MemRequest);
}

/// Allocator that keeps every freed request so callers can audit retirements.
#[derive(Debug, Default)]
pub struct RequestLedger {
    freed: Vec<MemRequest>,
}

impl RequestLedger {
    pub fn freed(&self) -> &[MemRequest] {
        &self.freed
    }

    pub fn freed_count(&self) -> usize {
        self.freed.len()
    }

    pub fn take_freed(&mut self) -> Vec<MemRequest> {
        std::mem::take(&mut self.freed)
    }
}

impl RequestAllocator for RequestLedger {
    fn free(&mut self, core_id: usize, mut req: MemRequest) {
        debug!("core {} retiring {}", core_id, req);
        req.state = ReqState::Retired;
        self.freed.push(req);
    }
}
