//! Realtime fan-out: typed events, per-room broker and signaling relay.

pub mod broker;
pub mod events;
pub mod signaling;

pub use broker::{RoomBroker, RoomSubscription, SharedFrame};
pub use events::{OutboundFrame, SyncEvent, WebRtcSignal};
pub use signaling::{ParticipantCounter, SignalRelay};
