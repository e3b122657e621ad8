use std::collections::VecDeque;
use std::fmt::Write;

use anyhow::{bail, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::link::config::LinkConfig;
use crate::link::engine::{LinkEngine, LinkRole, LinkSide};
use crate::link::message::LinkPool;
use crate::mem::port::{MemPort, PortEvent};
use crate::sim::config::Config;
use crate::sim::request::{MemRequest, ReqState};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExpanderConfig {
    // device DRAM clock; the backend ticks internal/link times per link cycle
    pub internal_freq_mhz: u64,
    pub link_freq_mhz: u64,
    pub debug_dump: bool,
}

impl Config for ExpanderConfig {}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            internal_freq_mhz: 1600,
            link_freq_mhz: 1600,
            debug_dump: false,
        }
    }
}

impl ExpanderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.internal_freq_mhz == 0 || self.link_freq_mhz == 0 {
            bail!("expander clock frequencies must be non-zero");
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ExpanderStats {
    pub reads_done: u64,
    pub writes_retired: u64,
    pub submit_refused: u64,
    pub backend_ticks: u64,
    pub peak_inflight: usize,
    pub write_turnaround_sum: u64,
    pub write_turnaround_count: u64,
}

impl ExpanderStats {
    pub fn avg_write_turnaround(&self) -> f64 {
        if self.write_turnaround_count == 0 {
            0.0
        } else {
            self.write_turnaround_sum as f64 / self.write_turnaround_count as f64
        }
    }
}

/// Device end of the link: a CXL type-3 memory expander in front of a DRAM backend.
///
/// Reads come back over the link once the backend finishes them.  Writes never produce a response;
/// they are queued on `retired` for the owner to hand back to the request allocator.
#[derive(Debug)]
pub struct MemoryExpander {
    pub link: LinkEngine,
    cfg: ExpanderConfig,
    port: MemPort,
    // received over the link, not yet accepted by the backend
    pending: VecDeque<MemRequest>,
    // finished reads waiting for room on the link
    resp_queue: VecDeque<MemRequest>,
    retired: VecDeque<MemRequest>,
    clock_acc: u64,
    inflight: usize,
    pub stats: ExpanderStats,
}

impl MemoryExpander {
    pub fn new(link_cfg: &LinkConfig, cfg: &ExpanderConfig, port: MemPort) -> Self {
        Self {
            link: LinkEngine::new("memory expander", LinkSide::Device, link_cfg),
            cfg: cfg.clone(),
            port,
            pending: VecDeque::new(),
            resp_queue: VecDeque::new(),
            retired: VecDeque::new(),
            clock_acc: 0,
            inflight: 0,
            stats: ExpanderStats::default(),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight
    }

    pub fn port(&self) -> &MemPort {
        &self.port
    }

    pub fn pop_retired(&mut self) -> Option<MemRequest> {
        self.retired.pop_front()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self.resp_queue.is_empty()
            && self.retired.is_empty()
            && self.inflight == 0
            && self.link.is_idle()
    }

    // Backend ticks owed for one link cycle; the remainder carries over.
    fn internal_ticks(&mut self) -> u64 {
        self.clock_acc += self.cfg.internal_freq_mhz;
        let ticks = self.clock_acc / self.cfg.link_freq_mhz;
        self.clock_acc %= self.cfg.link_freq_mhz;
        ticks
    }

    fn drain_completions(&mut self) {
        let now = self.link.cycle();
        while let Some(event) = self.port.poll() {
            self.inflight -= 1;
            match event {
                PortEvent::ReadDone(mut req) => {
                    debug!("memory expander cycle {}: read done {}", now, req);
                    req.state = ReqState::DeviceDone;
                    req.device_done_cycle = Some(now);
                    self.stats.reads_done += 1;
                    self.resp_queue.push_back(req);
                }
                PortEvent::WriteRetired(mut req) => {
                    debug!("memory expander cycle {}: write retired {}", now, req);
                    self.stats.writes_retired += 1;
                    self.stats.write_turnaround_sum += now.saturating_sub(req.insert_cycle);
                    self.stats.write_turnaround_count += 1;
                    req.state = ReqState::DeviceDone;
                    req.device_done_cycle = Some(now);
                    self.retired.push_back(req);
                }
            }
        }
    }

    // Offer every pending request to the backend; refused ones stay, in order.
    fn process_pending(&mut self) {
        let mut refused = VecDeque::new();
        while let Some(mut req) = self.pending.pop_front() {
            req.state = ReqState::DeviceStart;
            match self.port.try_submit(req) {
                Ok(()) => {
                    self.inflight += 1;
                    self.stats.peak_inflight = self.stats.peak_inflight.max(self.inflight);
                }
                Err(req) => {
                    self.stats.submit_refused += 1;
                    refused.push_back(req);
                }
            }
        }
        self.pending = refused;
    }

    pub fn dump(&self, pool: &LinkPool) -> String {
        let mut out = self.link.dump(pool);
        for (label, queue) in [
            ("pending", &self.pending),
            ("responses", &self.resp_queue),
            ("retired", &self.retired),
        ] {
            let _ = writeln!(out, "{} ({})", label, queue.len());
            for req in queue {
                let _ = writeln!(out, "  {}", req);
            }
        }
        out.push_str(&self.port.dump());
        out
    }
}

impl LinkRole for MemoryExpander {
    fn link_mut(&mut self) -> &mut LinkEngine {
        &mut self.link
    }

    fn start_transaction(&mut self, pool: &mut LinkPool) {
        while let Some(mut req) = self.resp_queue.pop_front() {
            req.state = ReqState::LinkReturning;
            if let Err(mut req) = self.link.push_outbound(req, pool) {
                req.state = ReqState::DeviceDone;
                self.resp_queue.push_front(req);
                break;
            }
        }
    }

    fn end_transaction(&mut self, pool: &mut LinkPool) {
        while let Some(req) = self.link.pull_inbound(pool) {
            self.pending.push_back(req);
        }
    }

    /// Send first, then run the backend at its own clock, then take in new requests.
    fn advance_one_cycle(&mut self, peer: &mut LinkEngine, pool: &mut LinkPool) {
        self.link.transmit(peer, pool);
        self.start_transaction(pool);
        for _ in 0..self.internal_ticks() {
            self.port.tick();
            self.stats.backend_ticks += 1;
        }
        self.drain_completions();
        self.process_pending();
        self.end_transaction(pool);
        self.link.receive(pool);
        self.link.tick();
    }
}
