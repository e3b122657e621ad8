pub mod base;
pub mod link;
pub mod mem;
pub mod sim;
pub mod timeq;
pub mod traffic;
