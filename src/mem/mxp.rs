use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write;

use anyhow::{bail, Result};
use log::debug;
use serde::Deserialize;

use crate::mem::port::PortEvent;
use crate::mem::router::CxlTarget;
use crate::sim::config::Config;
use crate::sim::request::{MemRequest, ReqState, RequestAllocator};
use crate::timeq::{Cycle, ServerConfig, ServiceRequest, TimedServer};

/// Request-level accelerator-memory engine reachable as an alternate CXL target.
pub trait MxpBackend {
    /// Returns the engine's request id, or 0 if the request was rejected.
    fn insert_request(&mut self, addr: u64, is_write: bool, handle: u64) -> u64;

    fn tick(&mut self);

    /// Handle of the next finished request.
    fn pull_completed(&mut self) -> Option<u64>;
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MxpConfig {
    pub latency: Cycle,
    pub queue_capacity: usize,
}

impl Config for MxpConfig {}

impl Default for MxpConfig {
    fn default() -> Self {
        Self {
            latency: 60,
            queue_capacity: 64,
        }
    }
}

impl MxpConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("MXP queue capacity must be non-zero");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FixedLatencyMxp {
    server: TimedServer<u64>,
    done: VecDeque<u64>,
    cycle: Cycle,
    next_id: u64,
}

impl FixedLatencyMxp {
    pub fn new(cfg: &MxpConfig) -> Self {
        Self {
            server: TimedServer::new(ServerConfig {
                base_latency: cfg.latency,
                bytes_per_cycle: 1,
                queue_capacity: cfg.queue_capacity,
            }),
            done: VecDeque::new(),
            cycle: 0,
            next_id: 0,
        }
    }
}

impl MxpBackend for FixedLatencyMxp {
    fn insert_request(&mut self, _addr: u64, _is_write: bool, handle: u64) -> u64 {
        if self.server.try_enqueue(self.cycle, ServiceRequest::new(handle, 1)).is_err() {
            return 0;
        }
        self.next_id += 1;
        self.next_id
    }

    fn tick(&mut self) {
        self.cycle += 1;
        let done = &mut self.done;
        self.server
            .service_ready(self.cycle, |result| done.push_back(result.payload));
    }

    fn pull_completed(&mut self) -> Option<u64> {
        self.done.pop_front()
    }
}

/// Core-side wrapper around an MXP engine.  Requests are identified by their own id, so
/// completions need no address matching.
pub struct MxpPort {
    backend: Box<dyn MxpBackend>,
    // request id -> (engine id, request)
    inflight: HashMap<u64, (u64, MemRequest)>,
    // engine request ids per address, for the dump
    by_addr: BTreeMap<u64, Vec<u64>>,
}

impl MxpPort {
    pub fn new(backend: Box<dyn MxpBackend>) -> Self {
        Self {
            backend,
            inflight: HashMap::new(),
            by_addr: BTreeMap::new(),
        }
    }

    pub fn try_submit(&mut self, req: MemRequest) -> Result<(), MemRequest> {
        let engine_id = self.backend.insert_request(req.addr, req.is_write(), req.id);
        if engine_id == 0 {
            return Err(req);
        }
        self.by_addr.entry(req.addr).or_default().push(engine_id);
        let prev = self.inflight.insert(req.id, (engine_id, req));
        assert!(prev.is_none(), "MXP: request id submitted twice");
        Ok(())
    }

    pub fn tick(&mut self) {
        self.backend.tick();
    }

    pub fn poll(&mut self) -> Option<PortEvent> {
        let handle = self.backend.pull_completed()?;
        let (engine_id, req) = self
            .inflight
            .remove(&handle)
            .unwrap_or_else(|| panic!("MXP: completion for unknown handle {handle}\n{}", self.dump()));
        if let Some(ids) = self.by_addr.get_mut(&req.addr) {
            ids.retain(|&id| id != engine_id);
            if ids.is_empty() {
                self.by_addr.remove(&req.addr);
            }
        }
        Some(if req.is_write() {
            PortEvent::WriteRetired(req)
        } else {
            PortEvent::ReadDone(req)
        })
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    pub fn dump(&self) -> String {
        let mut out = format!("MXP in flight ({})\n", self.inflight.len());
        for (addr, ids) in &self.by_addr {
            let _ = writeln!(out, "  {:#x}: {:?}", addr, ids);
        }
        out
    }
}

impl std::fmt::Debug for MxpPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MxpPort")
            .field("inflight", &self.inflight.len())
            .finish()
    }
}

/// MXP engine wired in where the IO domain would otherwise sit.
#[derive(Debug)]
pub struct MxpTarget {
    port: MxpPort,
    done: VecDeque<MemRequest>,
    cycle: Cycle,
    pub writes_retired: u64,
}

impl MxpTarget {
    pub fn new(port: MxpPort) -> Self {
        Self {
            port,
            done: VecDeque::new(),
            cycle: 0,
            writes_retired: 0,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.port.outstanding() + self.done.len()
    }
}

impl CxlTarget for MxpTarget {
    fn insert_request(&mut self, mut req: MemRequest) -> Result<(), MemRequest> {
        req.state = ReqState::DeviceStart;
        self.port.try_submit(req).map_err(|mut req| {
            req.state = ReqState::LinkEntryStart;
            req
        })
    }

    fn pop_request(&mut self) -> Option<MemRequest> {
        self.done.pop_front()
    }

    fn advance_one_cycle(&mut self, alloc: &mut dyn RequestAllocator) {
        self.port.tick();
        while let Some(event) = self.port.poll() {
            match event {
                PortEvent::ReadDone(mut req) => {
                    debug!("MXP cycle {}: done {}", self.cycle, req);
                    req.state = ReqState::DeviceDone;
                    req.device_done_cycle = Some(self.cycle);
                    self.done.push_back(req);
                }
                PortEvent::WriteRetired(req) => {
                    self.writes_retired += 1;
                    alloc.free(req.core_id, req);
                }
            }
        }
        self.cycle += 1;
    }

    fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }
}
