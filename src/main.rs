use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use cxlsim::link::config::Framing;
use cxlsim::mem::router::CxlTargetKind;
use cxlsim::sim::config::{log_filter, SystemConfig};
use cxlsim::sim::top::CxlSystem;
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct CxlsimArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override number of simulated cycles")]
    cycles: Option<u64>,
    #[arg(long, help = "Override link framing (flit, packet)")]
    framing: Option<Framing>,
    #[arg(long, help = "Override number of link lanes")]
    lanes: Option<u32>,
    #[arg(long, help = "Override CXL target (link, mxp)")]
    cxl_target: Option<CxlTargetKind>,
    #[arg(long, help = "Override number of CME slots")]
    cme_slots: Option<usize>,
    #[arg(long, help = "Override traffic request count")]
    requests: Option<u64>,
    #[arg(long, help = "Override random seed")]
    seed: Option<u64>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    log: Option<u64>,
}

fn run(argv: &CxlsimArgs) -> Result<bool> {
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;
    let mut cfg = SystemConfig::from_table(&config_table);

    // override toml configs with argv
    cfg.sim.cycles = argv.cycles.unwrap_or(cfg.sim.cycles);
    cfg.sim.seed = argv.seed.unwrap_or(cfg.sim.seed);
    cfg.sim.log_level = argv.log.unwrap_or(cfg.sim.log_level);
    cfg.link.framing = argv.framing.unwrap_or(cfg.link.framing);
    cfg.link.lanes = argv.lanes.unwrap_or(cfg.link.lanes);
    cfg.router.cxl_target = argv.cxl_target.unwrap_or(cfg.router.cxl_target);
    cfg.router.cme_slots = argv.cme_slots.unwrap_or(cfg.router.cme_slots);
    cfg.traffic.requests = argv.requests.unwrap_or(cfg.traffic.requests);

    log::set_max_level(log_filter(cfg.sim.log_level));

    let mut system = CxlSystem::new(cfg)?;
    let summary = system.simulate();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary.lost == 0 && summary.traffic.duplicates == 0)
}

pub fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let argv = CxlsimArgs::parse();
    match run(&argv) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("requests were lost or duplicated");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
