use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::sim::config::Config;
use crate::timeq::Cycle;

pub const VC_COUNT: usize = 2;

/// How the data-link layer frames messages for the physical layer.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Several messages share a fixed-size flit; write data travels as child messages; admission
    /// is checked against the peer's receive occupancy.
    #[default]
    Flit,
    /// One message per transfer unit, sized by its payload; byte credits per VC.
    Packet,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "flit" => Ok(Self::Flit),
            "packet" => Ok(Self::Packet),
            _ => Err(format!(
                "unsupported framing '{}', expected one of: flit, packet",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinkConfig {
    pub framing: Framing,
    pub lanes: u32,
    // bytes a single lane moves per link cycle
    pub lane_bytes_per_cycle: f64,
    pub vc_count: usize,
    // VC buffer capacities in messages (flit framing)
    pub txvc_capacity: u32,
    pub rxvc_capacity: u32,
    // VC buffer capacity in bytes for both directions (packet framing)
    pub vc_capacity_bytes: u32,
    pub txdll_capacity: usize,
    pub replay_capacity: usize,
    pub phys_capacity: usize,
    pub trans_latency: Cycle,
    pub dll_latency: Cycle,
    pub phys_latency: Cycle,
    pub max_msgs_per_flit: usize,
    pub data_slots_per_flit: usize,
    pub flit_bytes: u32,
    pub header_bytes: u32,
    pub data_bytes: u32,
    // number of data child messages that carry one request's payload (flit framing)
    pub data_msgs_per_req: u32,
}

impl Config for LinkConfig {}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Flit,
            lanes: 16,
            lane_bytes_per_cycle: 2.0,
            vc_count: VC_COUNT,
            txvc_capacity: 32,
            rxvc_capacity: 32,
            vc_capacity_bytes: 2048,
            txdll_capacity: 64,
            replay_capacity: 16,
            phys_capacity: 16,
            trans_latency: 2,
            dll_latency: 2,
            phys_latency: 4,
            max_msgs_per_flit: 4,
            data_slots_per_flit: 4,
            flit_bytes: 68,
            header_bytes: 16,
            data_bytes: 64,
            data_msgs_per_req: 4,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vc_count != VC_COUNT {
            bail!("link requires exactly {} virtual channels, got {}", VC_COUNT, self.vc_count);
        }
        if self.lanes == 0 || !self.lanes.is_power_of_two() {
            bail!("lane count must be a power of two, got {}", self.lanes);
        }
        if !(self.lane_bytes_per_cycle > 0.0) {
            bail!("per-lane bandwidth must be positive, got {}", self.lane_bytes_per_cycle);
        }
        if self.txdll_capacity == 0 || self.replay_capacity == 0 || self.phys_capacity == 0 {
            bail!("dll, replay and physical queue capacities must be non-zero");
        }
        match self.framing {
            Framing::Flit => {
                if self.txvc_capacity == 0 || self.rxvc_capacity == 0 {
                    bail!("VC capacities must be non-zero");
                }
                if self.max_msgs_per_flit == 0 {
                    bail!("a flit must hold at least one message");
                }
                if self.data_slots_per_flit > self.max_msgs_per_flit {
                    bail!(
                        "data slots per flit ({}) exceed messages per flit ({})",
                        self.data_slots_per_flit,
                        self.max_msgs_per_flit
                    );
                }
                if self.data_msgs_per_req > 0 && self.data_slots_per_flit == 0 {
                    bail!("write data needs at least one data slot per flit");
                }
                if self.txdll_capacity < 1 + self.data_msgs_per_req as usize {
                    bail!("dll queue cannot hold one request with its data messages");
                }
            }
            Framing::Packet => {
                if self.vc_capacity_bytes < self.header_bytes + self.data_bytes {
                    bail!(
                        "VC byte capacity {} cannot hold one data packet",
                        self.vc_capacity_bytes
                    );
                }
            }
        }
        Ok(())
    }

    pub fn bytes_per_cycle(&self) -> f64 {
        self.lanes as f64 * self.lane_bytes_per_cycle
    }

    pub fn data_msg_bytes(&self) -> u32 {
        if self.data_msgs_per_req == 0 {
            0
        } else {
            self.data_bytes.div_ceil(self.data_msgs_per_req)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        LinkConfig::default().validate().unwrap();
        let packet = LinkConfig {
            framing: Framing::Packet,
            ..LinkConfig::default()
        };
        packet.validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_lanes() {
        let cfg = LinkConfig {
            lanes: 12,
            ..LinkConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_vc_count_other_than_two() {
        let cfg = LinkConfig {
            vc_count: 3,
            ..LinkConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn framing_parses_from_str() {
        assert_eq!(Framing::Packet, "packet".parse().unwrap());
        assert!("tlp".parse::<Framing>().is_err());
    }
}
