//! Identifier types for consultation rooms.
//!
//! Two identifier spaces meet here:
//! - [`ContractId`]: the durable consultation identifier owned by the
//!   contract system.
//! - [`SessionId`]: a disposable transport session identifier.
//!
//! A [`RoomId`] is normally a contract id, but a room may be addressed by a
//! session id before the mapping to its contract is known.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable consultation (contract) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ContractId(pub i64);

impl ContractId {
    /// Wrap a raw identifier.
    #[inline]
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw integer value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContractId {
    type Err = core::num::ParseIntError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

impl From<i64> for ContractId {
    #[inline]
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Ephemeral transport session identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing session identifier string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Addressing key for a room: the unit of isolation for presence and fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "id")]
pub enum RoomId {
    /// Room resolved to its durable consultation.
    Contract(ContractId),
    /// Room addressed transiently by an unresolved session id.
    Session(SessionId),
}

impl RoomId {
    /// Interpret a URL path segment: integers are contract ids, anything else
    /// is a session id.
    #[must_use]
    pub fn from_segment(segment: &str) -> Self {
        segment
            .parse::<ContractId>()
            .map_or_else(|_| Self::Session(SessionId::new(segment)), Self::Contract)
    }

    /// Contract id when the room is resolved.
    #[must_use]
    pub const fn contract_id(&self) -> Option<ContractId> {
        match self {
            Self::Contract(id) => Some(*id),
            Self::Session(_) => None,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contract(id) => write!(f, "contract:{id}"),
            Self::Session(id) => write!(f, "session:{id}"),
        }
    }
}

impl From<ContractId> for RoomId {
    fn from(value: ContractId) -> Self {
        Self::Contract(value)
    }
}
