//! Session-contract mapping.

pub mod mapper;

pub use mapper::{SessionContractMapper, SessionMapping};
