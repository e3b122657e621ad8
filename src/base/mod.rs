pub mod pool;

pub use pool::{SlotId, SlotPool};
