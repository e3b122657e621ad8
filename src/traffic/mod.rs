pub mod config;
pub mod driver;

pub use config::TrafficConfig;
pub use driver::{TrafficDriver, TrafficStats};
