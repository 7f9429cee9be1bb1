//! Consultation room domain: presence, session mapping, fan-out and chat.

pub mod chat;
pub mod coordinator;
pub mod core;
pub mod fanout;
pub mod maintenance;
pub mod mapping;
pub mod presence;
pub mod store;

pub use coordinator::{JoinOutcome, JoinRequest, Participant, PresenceStatus, RoomCoordinator};
pub use self::core::{ContractId, RoomConfig, RoomError, RoomId, RoomResult, Role, SessionId};
