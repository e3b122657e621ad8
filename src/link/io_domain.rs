use anyhow::Result;
use log::{debug, info};
use serde::Serialize;

use crate::link::config::LinkConfig;
use crate::link::engine::{LinkRole, LinkStats};
use crate::link::expander::{ExpanderConfig, ExpanderStats, MemoryExpander};
use crate::link::message::LinkPool;
use crate::link::root_complex::RootComplex;
use crate::mem::port::MemPort;
use crate::mem::router::CxlTarget;
use crate::sim::request::{MemRequest, RequestAllocator};
use crate::timeq::Cycle;

#[derive(Debug, Clone, Serialize)]
pub struct IoDomainStats {
    pub root_complex: LinkStats,
    pub expander_link: LinkStats,
    pub expander: ExpanderStats,
    pub avg_write_turnaround: f64,
}

/// Owns the message/flit pools and a root complex wired to a memory expander.
#[derive(Debug)]
pub struct IoDomain {
    pool: LinkPool,
    pub rc: RootComplex,
    pub cme: MemoryExpander,
    cycle: Cycle,
    debug_dump: bool,
}

impl IoDomain {
    pub fn new(link_cfg: &LinkConfig, exp_cfg: &ExpanderConfig, port: MemPort) -> Result<Self> {
        link_cfg.validate()?;
        exp_cfg.validate()?;
        info!(
            "IO domain: {:?} framing, {} lanes x {} B/cycle, backend {:?}",
            link_cfg.framing, link_cfg.lanes, link_cfg.lane_bytes_per_cycle, port
        );
        Ok(Self {
            pool: LinkPool::default(),
            rc: RootComplex::new(link_cfg),
            cme: MemoryExpander::new(link_cfg, exp_cfg, port),
            cycle: 0,
            debug_dump: exp_cfg.debug_dump,
        })
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn pool(&self) -> &LinkPool {
        &self.pool
    }

    pub fn insert_request(&mut self, req: MemRequest) {
        self.rc.insert_request(req);
    }

    pub fn pop_request(&mut self) -> Option<MemRequest> {
        self.rc.pop_request()
    }

    /// Device end first, so a response it sends this cycle reaches the root complex this cycle.
    pub fn advance_one_cycle(&mut self, alloc: &mut dyn RequestAllocator) {
        self.cme.advance_one_cycle(&mut self.rc.link, &mut self.pool);
        while let Some(req) = self.cme.pop_retired() {
            alloc.free(req.core_id, req);
        }
        self.rc.advance_one_cycle(&mut self.cme.link, &mut self.pool);
        if self.debug_dump {
            debug!("{}", self.dump());
        }
        self.cycle += 1;
    }

    pub fn is_idle(&self) -> bool {
        self.rc.is_idle() && self.cme.is_idle()
    }

    pub fn stats(&self) -> IoDomainStats {
        IoDomainStats {
            root_complex: self.rc.link.stats.clone(),
            expander_link: self.cme.link.stats.clone(),
            expander: self.cme.stats.clone(),
            avg_write_turnaround: self.cme.stats.avg_write_turnaround(),
        }
    }

    pub fn dump(&self) -> String {
        let mut out = format!("##### IO domain @ cycle {} #####\n", self.cycle);
        out.push_str(&self.rc.dump(&self.pool));
        out.push_str(&self.cme.dump(&self.pool));
        out
    }
}

impl CxlTarget for IoDomain {
    fn insert_request(&mut self, req: MemRequest) -> Result<(), MemRequest> {
        IoDomain::insert_request(self, req);
        Ok(())
    }

    fn pop_request(&mut self) -> Option<MemRequest> {
        IoDomain::pop_request(self)
    }

    fn advance_one_cycle(&mut self, alloc: &mut dyn RequestAllocator) {
        IoDomain::advance_one_cycle(self, alloc);
    }

    fn is_idle(&self) -> bool {
        IoDomain::is_idle(self)
    }
}
