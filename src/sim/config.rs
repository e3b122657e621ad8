use anyhow::{bail, Result};
use log::{warn, LevelFilter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::link::config::LinkConfig;
use crate::link::expander::ExpanderConfig;
use crate::mem::backend::DramConfig;
use crate::mem::mxp::MxpConfig;
use crate::mem::router::RouterConfig;
use crate::traffic::config::TrafficConfig;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

/// Maps the numeric log level used in configs and on the command line (0: none, 1: info,
/// 2: debug) to a filter.  Warnings are always on.
pub fn log_filter(level: u64) -> LevelFilter {
    match level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub cycles: u64,
    // extra cycles after traffic stops, to let everything in flight come back
    pub drain_cycles: u64,
    pub log_level: u64,
    pub seed: u64,
    // per-node queue depth of the network stand-in
    pub network_capacity: usize,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cycles: 100_000,
            drain_cycles: 100_000,
            log_level: 0,
            seed: 0,
            network_capacity: 16,
        }
    }
}

/// Every section of a configuration file.
#[derive(Debug, Clone, Default)]
pub struct SystemConfig {
    pub sim: SimConfig,
    pub link: LinkConfig,
    pub expander: ExpanderConfig,
    pub router: RouterConfig,
    pub dram: DramConfig,
    pub cme_dram: DramConfig,
    pub mxp: MxpConfig,
    pub traffic: TrafficConfig,
}

impl SystemConfig {
    pub fn from_table(table: &Table) -> Self {
        Self {
            sim: SimConfig::from_section(table.get("sim")),
            link: LinkConfig::from_section(table.get("link")),
            expander: ExpanderConfig::from_section(table.get("expander")),
            router: RouterConfig::from_section(table.get("router")),
            dram: DramConfig::from_section(table.get("dram")),
            cme_dram: DramConfig::from_section(table.get("cme_dram")),
            mxp: MxpConfig::from_section(table.get("mxp")),
            traffic: TrafficConfig::from_section(table.get("traffic")),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sim.network_capacity == 0 {
            bail!("network capacity must be non-zero");
        }
        self.link.validate()?;
        self.expander.validate()?;
        self.router.validate()?;
        self.dram.validate()?;
        self.cme_dram.validate()?;
        self.mxp.validate()?;
        self.traffic.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::config::Framing;
    use crate::mem::backend::BackendShape;
    use crate::mem::router::ResponseOrder;

    #[test]
    fn sections_parse_with_defaults_for_missing_keys() {
        let table: Table = toml::from_str(
            r#"
            [sim]
            cycles = 500
            log_level = 2

            [link]
            framing = "packet"
            lanes = 8

            [router]
            cxl_range_start = 0x8000
            response_order = "cme_first"

            [cme_dram]
            shape = "transaction"
            additional_latency = 4
            "#,
        )
        .unwrap();
        let cfg = SystemConfig::from_table(&table);
        assert_eq!(500, cfg.sim.cycles);
        assert_eq!(2, cfg.sim.log_level);
        assert_eq!(Framing::Packet, cfg.link.framing);
        assert_eq!(8, cfg.link.lanes);
        assert_eq!(LinkConfig::default().trans_latency, cfg.link.trans_latency);
        assert_eq!(0x8000, cfg.router.cxl_range_start);
        assert_eq!(30, cfg.router.cme_slots);
        assert_eq!(ResponseOrder::CmeFirst, cfg.router.response_order);
        assert_eq!(BackendShape::Transaction, cfg.cme_dram.shape);
        assert_eq!(BackendShape::Callback, cfg.dram.shape);
        cfg.validate().unwrap();
    }

    #[test]
    fn invalid_section_fails_validation() {
        let table: Table = toml::from_str("[link]\nlanes = 6\n").unwrap();
        assert!(SystemConfig::from_table(&table).validate().is_err());
    }

    #[test]
    fn log_level_maps_to_filter() {
        assert_eq!(LevelFilter::Warn, log_filter(0));
        assert_eq!(LevelFilter::Info, log_filter(1));
        assert_eq!(LevelFilter::Debug, log_filter(2));
    }
}
