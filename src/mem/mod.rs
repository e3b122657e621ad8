pub mod addr_queue;
pub mod backend;
pub mod mxp;
pub mod port;
pub mod router;

pub use addr_queue::AddressQueues;
pub use backend::{BackendShape, DramBackend, DramCompletion, DramConfig, FixedLatencyDram};
pub use mxp::{FixedLatencyMxp, MxpBackend, MxpConfig, MxpPort, MxpTarget};
pub use port::{CallbackPort, MemPort, PortEvent, TransactionPort};
pub use router::{CmeEntry, CxlTarget, CxlTargetKind, McRouter, ResponseOrder, RouterConfig, RouterStats};

#[cfg(test)]
pub(crate) mod unit_tests;
