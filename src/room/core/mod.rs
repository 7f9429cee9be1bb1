//! Core room types: configuration, errors, identifiers and roles.

pub mod config;
pub mod errors;
pub mod ids;
pub mod role;

pub use config::{
    ChatConfig, FanoutConfig, GateConfig, MappingConfig, RoomConfig, StorageConfig, SweepConfig,
};
pub use errors::{RoomError, RoomResult};
pub use ids::{ContractId, RoomId, SessionId};
pub use role::Role;
