use anyhow::Result;
use log::{info, warn};
use serde::Serialize;

use crate::link::io_domain::{IoDomain, IoDomainStats};
use crate::mem::mxp::{FixedLatencyMxp, MxpPort, MxpTarget};
use crate::mem::port::MemPort;
use crate::mem::router::{CxlTarget, CxlTargetKind, McRouter, RouterStats};
use crate::sim::config::SystemConfig;
use crate::sim::network::QueueNetwork;
use crate::sim::request::RequestLedger;
use crate::timeq::Cycle;
use crate::traffic::driver::{TrafficDriver, TrafficStats};

/// What sits behind the memory controller's CXL side.
#[derive(Debug)]
pub enum CxlPath {
    Link(IoDomain),
    Mxp(MxpTarget),
}

impl CxlPath {
    pub fn target(&mut self) -> &mut dyn CxlTarget {
        match self {
            Self::Link(io) => io,
            Self::Mxp(mxp) => mxp,
        }
    }

    pub fn is_idle(&self) -> bool {
        match self {
            Self::Link(io) => io.is_idle(),
            Self::Mxp(mxp) => mxp.is_idle(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimSummary {
    pub cycles: Cycle,
    pub drained: bool,
    pub lost: u64,
    pub traffic: TrafficStats,
    pub router: RouterStats,
    pub io_domain: Option<IoDomainStats>,
    pub mxp_writes_retired: Option<u64>,
    pub network_sent: u64,
    pub network_refused: u64,
}

/// Top-level scheduler: traffic, network, memory controller and CXL path, one tick each per cycle.
#[derive(Debug)]
pub struct CxlSystem {
    cfg: SystemConfig,
    net: QueueNetwork,
    router: McRouter,
    cxl: CxlPath,
    ledger: RequestLedger,
    driver: TrafficDriver,
    cycle: Cycle,
}

impl CxlSystem {
    pub fn new(cfg: SystemConfig) -> Result<Self> {
        cfg.validate()?;
        let router = McRouter::new(&cfg.router, MemPort::from_config(&cfg.dram))?;
        let cxl = match cfg.router.cxl_target {
            CxlTargetKind::Link => CxlPath::Link(IoDomain::new(
                &cfg.link,
                &cfg.expander,
                MemPort::from_config(&cfg.cme_dram),
            )?),
            CxlTargetKind::Mxp => CxlPath::Mxp(MxpTarget::new(MxpPort::new(Box::new(
                FixedLatencyMxp::new(&cfg.mxp),
            )))),
        };
        let driver = TrafficDriver::new(
            &cfg.traffic,
            cfg.sim.seed,
            router.node(),
            cfg.router.cxl_range_start,
        );
        Ok(Self {
            net: QueueNetwork::new(cfg.sim.network_capacity),
            router,
            cxl,
            ledger: RequestLedger::default(),
            driver,
            cycle: 0,
            cfg,
        })
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn cxl(&self) -> &CxlPath {
        &self.cxl
    }

    pub fn tick(&mut self) {
        self.driver.tick(self.cycle, &mut self.net);
        self.router
            .run_a_cycle(&mut self.net, self.cxl.target(), &mut self.ledger);
        self.cxl.target().advance_one_cycle(&mut self.ledger);
        for req in self.ledger.take_freed() {
            self.driver.complete(self.cycle, req);
        }
        self.cycle += 1;
    }

    pub fn is_quiescent(&self) -> bool {
        self.driver.is_done() && self.router.is_idle() && self.cxl.is_idle()
    }

    /// Run the configured cycles, then keep going until everything in flight has come back.
    pub fn simulate(&mut self) -> SimSummary {
        for _ in 0..self.cfg.sim.cycles {
            self.tick();
        }
        let mut drained = self.is_quiescent();
        for _ in 0..self.cfg.sim.drain_cycles {
            if drained {
                break;
            }
            self.tick();
            drained = self.is_quiescent();
        }
        if !drained {
            warn!(
                "{} requests still outstanding after {} cycles",
                self.driver.outstanding(),
                self.cycle
            );
        }
        info!("simulation finished at cycle {}", self.cycle);
        self.summary(drained)
    }

    pub fn summary(&self, drained: bool) -> SimSummary {
        let traffic = self.driver.stats();
        let (io_domain, mxp_writes_retired) = match &self.cxl {
            CxlPath::Link(io) => (Some(io.stats()), None),
            CxlPath::Mxp(mxp) => (None, Some(mxp.writes_retired)),
        };
        SimSummary {
            cycles: self.cycle,
            drained,
            lost: traffic.outstanding,
            traffic,
            router: self.router.stats.clone(),
            io_domain,
            mxp_writes_retired,
            network_sent: self.net.sent(),
            network_refused: self.net.refused(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toml::Table;

    fn system(extra: &str) -> CxlSystem {
        let text = format!(
            r#"
            [sim]
            cycles = 2000
            drain_cycles = 50000
            seed = 7

            [traffic]
            requests = 400

            [traffic.issue]
            max_inflight = 16
            {}
            "#,
            extra
        );
        let table: Table = toml::from_str(&text).unwrap();
        CxlSystem::new(SystemConfig::from_table(&table)).unwrap()
    }

    fn assert_clean(summary: &SimSummary) {
        assert!(summary.drained);
        assert_eq!(0, summary.lost);
        assert_eq!(0, summary.traffic.duplicates);
        assert_eq!(400, summary.traffic.issued);
        assert_eq!(
            400,
            summary.traffic.reads_returned + summary.traffic.writes_retired
        );
    }

    #[test]
    fn flit_link_returns_every_request() {
        let mut sys = system("");
        let summary = sys.simulate();
        assert_clean(&summary);
        assert!(summary.traffic.cxl_issued > 0);
        let io = summary.io_domain.expect("link target");
        assert_eq!(
            summary.router.cme_reads,
            io.expander.reads_done
        );
        assert_eq!(summary.router.cme_writes, io.expander.writes_retired);
        assert!(sys.is_quiescent());
    }

    #[test]
    fn packet_link_returns_every_request() {
        let mut sys = system(
            r#"
            [link]
            framing = "packet"
            vc_capacity_bytes = 256
            "#,
        );
        assert_clean(&sys.simulate());
    }

    #[test]
    fn transaction_backend_behind_the_link() {
        let mut sys = system(
            r#"
            [cme_dram]
            shape = "transaction"
            additional_latency = 10

            [expander]
            internal_freq_mhz = 1200
            link_freq_mhz = 800
            "#,
        );
        assert_clean(&sys.simulate());
    }

    #[test]
    fn mxp_target_returns_every_request() {
        let mut sys = system(
            r#"
            [router]
            cxl_target = "mxp"
            "#,
        );
        let summary = sys.simulate();
        assert_clean(&summary);
        assert!(summary.io_domain.is_none());
        assert_eq!(Some(summary.router.cme_writes), summary.mxp_writes_retired);
    }

    #[test]
    fn disabled_cxl_keeps_everything_local() {
        let mut sys = system(
            r#"
            [router]
            cxl_enable = false
            "#,
        );
        let summary = sys.simulate();
        assert_clean(&summary);
        assert_eq!(0, summary.router.cme_reads + summary.router.cme_writes);
        assert_eq!(
            400,
            summary.router.dimm_reads + summary.router.dimm_writes
        );
    }
}
