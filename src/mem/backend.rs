use std::collections::VecDeque;
use std::str::FromStr;

use anyhow::{bail, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::sim::config::Config;
use crate::timeq::{Backpressure, Cycle, ServerConfig, ServiceRequest, TimedServer};

/// How the core talks to a DRAM timing model.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendShape {
    /// `submit` decides acceptance; completions are matched per address, oldest first.
    #[default]
    Callback,
    /// `will_accept` is checked before `submit`; completions take the first pushed request at that address.
    Transaction,
}

impl FromStr for BackendShape {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "callback" => Ok(Self::Callback),
            "transaction" => Ok(Self::Transaction),
            _ => Err(format!(
                "unsupported backend shape '{}', expected one of: callback, transaction",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DramConfig {
    pub shape: BackendShape,
    pub read_latency: Cycle,
    pub write_latency: Cycle,
    pub queue_capacity: usize,
    pub bytes_per_cycle: u32,
    pub access_bytes: u32,
    // transaction shape only: extra cycles before a finished read is handed back
    pub additional_latency: Cycle,
}

impl Config for DramConfig {}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            shape: BackendShape::Callback,
            read_latency: 40,
            write_latency: 30,
            queue_capacity: 32,
            bytes_per_cycle: 32,
            access_bytes: 64,
            additional_latency: 0,
        }
    }
}

impl DramConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("DRAM queue capacity must be non-zero");
        }
        if self.bytes_per_cycle == 0 {
            bail!("DRAM bandwidth must be non-zero");
        }
        Ok(())
    }
}

/// Completion reported by a timing model.  It only knows the address, not the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DramCompletion {
    pub addr: u64,
    pub is_write: bool,
}

/// A DRAM timing model as seen by the memory controller and the expander.
pub trait DramBackend {
    fn will_accept(&self, addr: u64, is_write: bool) -> bool;

    /// Returns false if the access was not accepted.  Must succeed when `will_accept` said yes on
    /// the same cycle.
    fn submit(&mut self, addr: u64, is_write: bool) -> bool;

    fn tick(&mut self);

    fn pop_completion(&mut self) -> Option<DramCompletion>;

    fn outstanding(&self) -> usize;
}

/// Fixed latency/bandwidth model, one bounded queue, in-order completion.
#[derive(Debug)]
pub struct FixedLatencyDram {
    cfg: DramConfig,
    server: TimedServer<DramCompletion>,
    done: VecDeque<DramCompletion>,
    cycle: Cycle,
    pub reads_accepted: u64,
    pub writes_accepted: u64,
}

impl FixedLatencyDram {
    pub fn new(cfg: &DramConfig) -> Self {
        let server = TimedServer::new(ServerConfig {
            base_latency: 0,
            bytes_per_cycle: cfg.bytes_per_cycle,
            queue_capacity: cfg.queue_capacity,
        });
        Self {
            cfg: cfg.clone(),
            server,
            done: VecDeque::new(),
            cycle: 0,
            reads_accepted: 0,
            writes_accepted: 0,
        }
    }
}

impl DramBackend for FixedLatencyDram {
    fn will_accept(&self, _addr: u64, _is_write: bool) -> bool {
        !self.server.is_full()
    }

    fn submit(&mut self, addr: u64, is_write: bool) -> bool {
        let latency = if is_write {
            self.cfg.write_latency
        } else {
            self.cfg.read_latency
        };
        let access = DramCompletion { addr, is_write };
        let request = ServiceRequest::new(access, self.cfg.access_bytes).with_extra_latency(latency);
        let ticket = match self.server.try_enqueue(self.cycle, request) {
            Ok(ticket) => ticket,
            Err(Backpressure::QueueFull { capacity, .. }) => {
                debug!("dram cycle {}: queue full ({}), refusing {:#x}", self.cycle, capacity, addr);
                return false;
            }
        };
        debug!(
            "dram cycle {}: {:#x} ({} B) issued at {}, ready at {}",
            self.cycle,
            addr,
            ticket.size_bytes(),
            ticket.issued_at(),
            ticket.ready_at()
        );
        if is_write {
            self.writes_accepted += 1;
        } else {
            self.reads_accepted += 1;
        }
        true
    }

    fn tick(&mut self) {
        self.cycle += 1;
        let done = &mut self.done;
        self.server
            .service_ready(self.cycle, |result| done.push_back(result.payload));
    }

    fn pop_completion(&mut self) -> Option<DramCompletion> {
        self.done.pop_front()
    }

    fn outstanding(&self) -> usize {
        self.server.outstanding() + self.done.len()
    }
}
