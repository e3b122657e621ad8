use std::collections::HashMap;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::sim::network::{Network, NodeId};
use crate::sim::request::{MemRequest, ReqKind};
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;

#[derive(Debug, Default, Clone, Serialize)]
pub struct TrafficStats {
    pub issued: u64,
    pub cxl_issued: u64,
    pub network_refused: u64,
    pub reads_returned: u64,
    pub writes_retired: u64,
    pub duplicates: u64,
    pub outstanding: u64,
    pub read_latency_sum: u64,
    pub avg_read_latency: f64,
}

/// Seeded random requester standing in for the cores and last-level caches.  Every request it
/// issues must come back exactly once: reads over the network, writes through the allocator.
#[derive(Debug)]
pub struct TrafficDriver {
    cfg: TrafficConfig,
    rng: StdRng,
    mc: NodeId,
    cxl_base: u64,
    next_id: u64,
    // request id -> (kind, issue cycle)
    outstanding: HashMap<u64, (ReqKind, Cycle)>,
    // refused by the network last time, resent before anything new
    held: Option<MemRequest>,
    stats: TrafficStats,
}

impl TrafficDriver {
    pub fn new(cfg: &TrafficConfig, seed: u64, mc: NodeId, cxl_base: u64) -> Self {
        Self {
            cfg: cfg.clone(),
            rng: StdRng::seed_from_u64(seed),
            mc,
            cxl_base,
            next_id: 0,
            outstanding: HashMap::new(),
            held: None,
            stats: TrafficStats::default(),
        }
    }

    fn generate(&mut self, now: Cycle) -> MemRequest {
        let addr_cfg = &self.cfg.address;
        let lines = addr_cfg.span_bytes / addr_cfg.line_bytes;
        let offset = self.rng.gen_range(0..lines) * addr_cfg.line_bytes;
        let to_cxl = self.rng.gen_bool(self.cfg.cxl_ratio);
        let addr = if to_cxl {
            self.cxl_base + offset
        } else {
            addr_cfg.local_base + offset
        };
        let kind = if self.rng.gen_bool(self.cfg.read_ratio) {
            ReqKind::Read
        } else {
            ReqKind::Write
        };
        let core = self.rng.gen_range(0..self.cfg.num_cores);

        self.next_id += 1;
        let mut req = MemRequest::new(self.next_id, addr, kind);
        req.core_id = core;
        req.llc_id = core;
        req.insert_cycle = now;
        if to_cxl {
            self.stats.cxl_issued += 1;
        }
        req
    }

    pub fn tick(&mut self, now: Cycle, net: &mut dyn Network) {
        for _ in 0..self.cfg.issue.issue_per_cycle {
            if self.outstanding.len() >= self.cfg.issue.max_inflight {
                break;
            }
            let req = match self.held.take() {
                Some(req) => req,
                None if self.next_id < self.cfg.requests => self.generate(now),
                None => break,
            };
            let (id, kind) = (req.id, req.kind);
            let src = NodeId::llc(req.llc_id);
            match net.send(req, src, self.mc) {
                Ok(()) => {
                    self.outstanding.insert(id, (kind, now));
                    self.stats.issued += 1;
                }
                Err(req) => {
                    self.stats.network_refused += 1;
                    self.held = Some(req);
                    break;
                }
            }
        }

        for core in 0..self.cfg.num_cores {
            while let Some(req) = net.receive_pop(NodeId::llc(core)) {
                self.complete(now, req);
            }
        }
    }

    /// Account for a returned read or a retired write.
    pub fn complete(&mut self, now: Cycle, req: MemRequest) {
        let Some((kind, issued_at)) = self.outstanding.remove(&req.id) else {
            warn!("cycle {}: {} returned more than once", now, req);
            self.stats.duplicates += 1;
            return;
        };
        debug!("cycle {}: {} complete after {} cycles", now, req, now - issued_at);
        match kind {
            ReqKind::Read => {
                self.stats.reads_returned += 1;
                self.stats.read_latency_sum += now - issued_at;
            }
            ReqKind::Write => self.stats.writes_retired += 1,
        }
    }

    pub fn is_done(&self) -> bool {
        self.next_id >= self.cfg.requests && self.held.is_none() && self.outstanding.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn stats(&self) -> TrafficStats {
        let mut stats = self.stats.clone();
        stats.outstanding = self.outstanding.len() as u64;
        if stats.reads_returned > 0 {
            stats.avg_read_latency = stats.read_latency_sum as f64 / stats.reads_returned as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::network::QueueNetwork;

    #[test]
    fn issues_configured_count_and_tracks_completions() {
        let cfg = TrafficConfig {
            requests: 8,
            num_cores: 1,
            ..TrafficConfig::default()
        };
        let mut net = QueueNetwork::new(64);
        let mut driver = TrafficDriver::new(&cfg, 0, NodeId::mc(0), 0x10_0000);
        for now in 0..8 {
            driver.tick(now, &mut net);
        }
        assert_eq!(8, driver.stats().issued);
        assert_eq!(8, net.pending(NodeId::mc(0)));

        while let Some(req) = net.receive_pop(NodeId::mc(0)) {
            driver.complete(10, req);
        }
        assert!(driver.is_done());
        assert_eq!(0, driver.stats().duplicates);
    }

    #[test]
    fn second_return_counts_as_duplicate() {
        let cfg = TrafficConfig {
            requests: 1,
            num_cores: 1,
            ..TrafficConfig::default()
        };
        let mut net = QueueNetwork::new(4);
        let mut driver = TrafficDriver::new(&cfg, 0, NodeId::mc(0), 0x10_0000);
        driver.tick(0, &mut net);
        let req = net.receive_pop(NodeId::mc(0)).unwrap();
        let id = req.id;
        driver.complete(5, req);
        driver.complete(6, MemRequest::read(id, 0));
        assert_eq!(1, driver.stats().duplicates);
    }

    #[test]
    fn same_seed_same_stream() {
        let cfg = TrafficConfig::default();
        let mut a = TrafficDriver::new(&cfg, 0, NodeId::mc(0), 0x10_0000);
        let mut b = TrafficDriver::new(&cfg, 0, NodeId::mc(0), 0x10_0000);
        for now in 0..16 {
            let (x, y) = (a.generate(now), b.generate(now));
            assert_eq!((x.addr, x.kind, x.core_id), (y.addr, y.kind, y.core_id));
        }
    }
}
