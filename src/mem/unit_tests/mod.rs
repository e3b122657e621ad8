pub(crate) mod recording;
mod router_tests;
