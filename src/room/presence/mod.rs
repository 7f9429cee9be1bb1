//! Agent presence tracking and the client entry gate.

pub mod gate;
pub mod tracker;

pub use gate::{EntryGate, GateDecision};
pub use tracker::{PresenceArena, PresenceSnapshot, PresenceTracker};
