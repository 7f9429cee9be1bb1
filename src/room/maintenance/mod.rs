//! Background maintenance.

pub mod sweeper;

pub use sweeper::{StoreSweeper, SweepStats};
