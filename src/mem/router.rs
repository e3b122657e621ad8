use std::collections::VecDeque;
use std::fmt::Write;
use std::str::FromStr;

use anyhow::{bail, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::base::{SlotId, SlotPool};
use crate::mem::port::{MemPort, PortEvent};
use crate::sim::config::Config;
use crate::sim::network::{Network, NodeId};
use crate::sim::request::{MemRequest, ReqState, RequestAllocator};
use crate::timeq::Cycle;

/// Whatever sits behind the router's CXL side: the IO domain, or the MXP engine.
pub trait CxlTarget {
    /// Take ownership of a CXL-routed request.  A refused request is handed back.
    fn insert_request(&mut self, req: MemRequest) -> Result<(), MemRequest>;

    /// Next finished read.
    fn pop_request(&mut self) -> Option<MemRequest>;

    /// Completed writes are freed through `alloc` from inside this call.
    fn advance_one_cycle(&mut self, alloc: &mut dyn RequestAllocator);

    fn is_idle(&self) -> bool;
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrder {
    #[default]
    DimmFirst,
    CmeFirst,
}

impl FromStr for ResponseOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dimm_first" => Ok(Self::DimmFirst),
            "cme_first" => Ok(Self::CmeFirst),
            _ => Err(format!(
                "unsupported response order '{}', expected one of: dimm_first, cme_first",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CxlTargetKind {
    #[default]
    Link,
    Mxp,
}

impl FromStr for CxlTargetKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "link" => Ok(Self::Link),
            "mxp" => Ok(Self::Mxp),
            _ => Err(format!(
                "unsupported CXL target '{}', expected one of: link, mxp",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RouterConfig {
    pub id: usize,
    pub cxl_enable: bool,
    // first address served over CXL; everything at or above it is CXL-routed
    pub cxl_range_start: u64,
    pub cme_slots: usize,
    // requests taken off the network per cycle
    pub receive_width: usize,
    pub response_order: ResponseOrder,
    pub cxl_target: CxlTargetKind,
    pub debug_dump: bool,
}

impl Config for RouterConfig {}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id: 0,
            cxl_enable: true,
            cxl_range_start: 0x1_0000_0000,
            cme_slots: 30,
            receive_width: 1,
            response_order: ResponseOrder::DimmFirst,
            cxl_target: CxlTargetKind::Link,
            debug_dump: false,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cme_slots == 0 {
            bail!("CME slot count must be non-zero");
        }
        if self.receive_width == 0 {
            bail!("router receive width must be non-zero");
        }
        Ok(())
    }

    pub fn is_cxl(&self, addr: u64) -> bool {
        self.cxl_enable && addr >= self.cxl_range_start
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RouterStats {
    pub dimm_reads: u64,
    pub dimm_writes: u64,
    pub dimm_refused: u64,
    pub dimm_writes_retired: u64,
    pub cme_reads: u64,
    pub cme_writes: u64,
    pub cme_slot_refused: u64,
    pub cme_target_refused: u64,
    pub responses_sent: u64,
    pub send_refused: u64,
    pub peak_cxl_inflight: usize,
    pub min_addr: Option<u64>,
    pub max_addr: Option<u64>,
}

impl RouterStats {
    fn track_addr(&mut self, addr: u64) {
        self.min_addr = Some(self.min_addr.map_or(addr, |min| min.min(addr)));
        self.max_addr = Some(self.max_addr.map_or(addr, |max| max.max(addr)));
    }
}

/// A CXL-routed request waiting to be handed to the CXL target.
#[derive(Debug)]
pub struct CmeEntry {
    pub req: MemRequest,
    pub insert_cycle: Cycle,
}

/// Memory controller front end.  Splits arriving requests between the local DIMM and the CXL
/// target by address, and merges both response streams back into the network.
#[derive(Debug)]
pub struct McRouter {
    cfg: RouterConfig,
    node: NodeId,
    dimm: MemPort,
    cme_slots: SlotPool<CmeEntry>,
    cme_in: VecDeque<SlotId>,
    dimm_resp: VecDeque<MemRequest>,
    cme_resp: VecDeque<MemRequest>,
    // CXL reads handed off and not yet returned
    cxl_inflight: usize,
    cycle: Cycle,
    pub stats: RouterStats,
}

#[derive(Clone, Copy)]
enum RespQueue {
    Dimm,
    Cme,
}

impl McRouter {
    pub fn new(cfg: &RouterConfig, dimm: MemPort) -> Result<Self> {
        cfg.validate()?;
        info!(
            "memory controller {}: CXL {} from {:#x}, {} CME slots, target {:?}",
            cfg.id,
            if cfg.cxl_enable { "enabled" } else { "disabled" },
            cfg.cxl_range_start,
            cfg.cme_slots,
            cfg.cxl_target
        );
        Ok(Self {
            cfg: cfg.clone(),
            node: NodeId::mc(cfg.id),
            dimm,
            cme_slots: SlotPool::bounded("CME slots", cfg.cme_slots),
            cme_in: VecDeque::new(),
            dimm_resp: VecDeque::new(),
            cme_resp: VecDeque::new(),
            cxl_inflight: 0,
            cycle: 0,
            stats: RouterStats::default(),
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn free_cme_slots(&self) -> usize {
        self.cme_slots.available().unwrap_or(0)
    }

    pub fn cxl_inflight(&self) -> usize {
        self.cxl_inflight
    }

    pub fn dimm_port(&self) -> &MemPort {
        &self.dimm
    }

    pub fn is_idle(&self) -> bool {
        self.cme_in.is_empty()
            && self.dimm_resp.is_empty()
            && self.cme_resp.is_empty()
            && self.dimm.outstanding() == 0
    }

    pub fn run_a_cycle(
        &mut self,
        net: &mut dyn Network,
        cxl: &mut dyn CxlTarget,
        alloc: &mut dyn RequestAllocator,
    ) {
        self.send(net);
        self.dimm_schedule(alloc);
        self.cme_schedule(cxl);
        self.receive(net);
        if self.cfg.debug_dump {
            debug!("{}", self.dump());
        }
        self.cycle += 1;
    }

    // Drain both response queues into the network; a refusal stops that queue for this cycle.
    fn send(&mut self, net: &mut dyn Network) {
        let order = match self.cfg.response_order {
            ResponseOrder::DimmFirst => [RespQueue::Dimm, RespQueue::Cme],
            ResponseOrder::CmeFirst => [RespQueue::Cme, RespQueue::Dimm],
        };
        for which in order {
            let queue = match which {
                RespQueue::Dimm => &mut self.dimm_resp,
                RespQueue::Cme => &mut self.cme_resp,
            };
            while let Some(mut req) = queue.pop_front() {
                let prev_state = req.state;
                req.state = ReqState::NocFill;
                let dst = NodeId::llc(req.llc_id);
                match net.send(req, self.node, dst) {
                    Ok(()) => self.stats.responses_sent += 1,
                    Err(mut req) => {
                        req.state = prev_state;
                        queue.push_front(req);
                        self.stats.send_refused += 1;
                        break;
                    }
                }
            }
        }
    }

    fn dimm_schedule(&mut self, alloc: &mut dyn RequestAllocator) {
        self.dimm.tick();
        while let Some(event) = self.dimm.poll() {
            match event {
                PortEvent::ReadDone(mut req) => {
                    req.state = ReqState::DeviceDone;
                    req.device_done_cycle = Some(self.cycle);
                    self.dimm_resp.push_back(req);
                }
                PortEvent::WriteRetired(req) => {
                    self.stats.dimm_writes_retired += 1;
                    alloc.free(req.core_id, req);
                }
            }
        }
    }

    fn cme_schedule(&mut self, cxl: &mut dyn CxlTarget) {
        while let Some(&id) = self.cme_in.front() {
            self.cme_in.pop_front();
            let CmeEntry { req, insert_cycle } = self.cme_slots.release(id);
            let is_read = !req.is_write();
            match cxl.insert_request(req) {
                Ok(()) => {
                    if is_read {
                        self.cxl_inflight += 1;
                        self.stats.peak_cxl_inflight =
                            self.stats.peak_cxl_inflight.max(self.cxl_inflight);
                    }
                }
                Err(req) => {
                    // target refused: the entry keeps its slot and its place at the head
                    self.stats.cme_target_refused += 1;
                    let id = self
                        .cme_slots
                        .acquire(CmeEntry { req, insert_cycle })
                        .expect("slot released above");
                    self.cme_in.push_front(id);
                    break;
                }
            }
        }

        while let Some(req) = cxl.pop_request() {
            self.cxl_inflight = self.cxl_inflight.saturating_sub(1);
            self.cme_resp.push_back(req);
        }
    }

    fn receive(&mut self, net: &mut dyn Network) {
        for _ in 0..self.cfg.receive_width {
            let Some(peeked) = net.receive(self.node) else {
                break;
            };
            let is_cxl = self.cfg.is_cxl(peeked.addr);
            if is_cxl && self.cme_slots.is_exhausted() {
                debug!("router cycle {}: no CME slot for {}", self.cycle, peeked);
                self.stats.cme_slot_refused += 1;
                break;
            }
            if !is_cxl && !self.dimm.will_accept(peeked) {
                self.stats.dimm_refused += 1;
                break;
            }
            let Some(mut req) = net.receive_pop(self.node) else {
                break;
            };
            req.insert_cycle = self.cycle;
            self.stats.track_addr(req.addr);

            if is_cxl {
                if req.is_write() {
                    self.stats.cme_writes += 1;
                } else {
                    self.stats.cme_reads += 1;
                }
                req.state = ReqState::LinkEntryStart;
                debug!("router cycle {}: {} -> CXL", self.cycle, req);
                let id = self
                    .cme_slots
                    .acquire(CmeEntry {
                        req,
                        insert_cycle: self.cycle,
                    })
                    .expect("CME slot checked above");
                self.cme_in.push_back(id);
            } else {
                if req.is_write() {
                    self.stats.dimm_writes += 1;
                } else {
                    self.stats.dimm_reads += 1;
                }
                req.state = ReqState::DimmPending;
                debug!("router cycle {}: {} -> DIMM", self.cycle, req);
                if let Err(req) = self.dimm.try_submit(req) {
                    panic!("DIMM backend refused {} after accepting it", req);
                }
            }
        }
    }

    pub fn dump(&self) -> String {
        let mut out = format!(
            "=== memory controller {} @ cycle {} ===\n",
            self.cfg.id, self.cycle
        );
        let _ = writeln!(
            out,
            "CME slots: {} free, CXL reads in flight: {}",
            self.free_cme_slots(),
            self.cxl_inflight
        );
        for &id in &self.cme_in {
            let entry = self.cme_slots.get(id);
            let _ = writeln!(out, "  {} {} since {}", id, entry.req, entry.insert_cycle);
        }
        for (label, queue) in [("DIMM responses", &self.dimm_resp), ("CME responses", &self.cme_resp)] {
            let _ = writeln!(out, "{} ({})", label, queue.len());
            for req in queue {
                let _ = writeln!(out, "  {}", req);
            }
        }
        out.push_str(&self.dimm.dump());
        out
    }
}
