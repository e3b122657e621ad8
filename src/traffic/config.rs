use anyhow::{bail, Result};
use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub requests: u64,
    // fraction of requests that are reads
    pub read_ratio: f64,
    // fraction of requests aimed at the CXL range
    pub cxl_ratio: f64,
    pub num_cores: usize,
    pub address: TrafficAddressConfig,
    pub issue: TrafficIssueConfig,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            requests: 4096,
            read_ratio: 0.7,
            cxl_ratio: 0.5,
            num_cores: 4,
            address: TrafficAddressConfig::default(),
            issue: TrafficIssueConfig::default(),
        }
    }
}

impl TrafficConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.read_ratio) || !(0.0..=1.0).contains(&self.cxl_ratio) {
            bail!("traffic ratios must lie in [0, 1]");
        }
        if self.num_cores == 0 {
            bail!("traffic needs at least one core");
        }
        if self.address.line_bytes == 0 || self.address.span_bytes < self.address.line_bytes {
            bail!("traffic address span must hold at least one line");
        }
        if self.issue.issue_per_cycle == 0 || self.issue.max_inflight == 0 {
            bail!("traffic issue width and in-flight limit must be non-zero");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficAddressConfig {
    pub line_bytes: u64,
    // bytes addressed on each side of the CXL boundary
    pub span_bytes: u64,
    // first address of local traffic
    pub local_base: u64,
}

impl Default for TrafficAddressConfig {
    fn default() -> Self {
        Self {
            line_bytes: 64,
            span_bytes: 64 << 10,
            local_base: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficIssueConfig {
    pub issue_per_cycle: usize,
    pub max_inflight: usize,
}

impl Default for TrafficIssueConfig {
    fn default() -> Self {
        Self {
            issue_per_cycle: 1,
            max_inflight: 64,
        }
    }
}
