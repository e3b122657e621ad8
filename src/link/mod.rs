pub mod config;
pub mod engine;
pub mod expander;
pub mod io_domain;
pub mod message;
pub mod root_complex;
pub mod vc;

#[cfg(test)]
mod unit_tests;

pub use config::{Framing, LinkConfig, VC_COUNT};
pub use engine::{LinkEngine, LinkRole, LinkSide, LinkStats};
pub use expander::{ExpanderConfig, ExpanderStats, MemoryExpander};
pub use io_domain::{IoDomain, IoDomainStats};
pub use message::{Flit, FlitId, LinkPool, Message, MsgId, MsgStage, VcId};
pub use root_complex::RootComplex;
pub use vc::VcBuffer;
