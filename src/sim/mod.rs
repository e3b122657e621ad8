pub mod config;
pub mod network;
pub mod request;
pub mod top;
