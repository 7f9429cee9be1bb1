//! Participant roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared role of a room participant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Consultation agent; opens the room.
    #[serde(alias = "AGENT")]
    Agent,
    /// Customer; may only enter while an agent is present.
    #[serde(alias = "CLIENT")]
    Client,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Client => "client",
        }
    }

    /// Resolve a declared role, treating missing or unrecognized values as
    /// [`Role::Client`] so that they go through the presence gate.
    #[must_use]
    pub fn from_declared(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Self::Client)
    }

    /// Display name used when a message carries no sender name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Agent => "Agent",
            Self::Client => "Client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "client" => Ok(Self::Client),
            _ => Err(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("AGENT".parse::<Role>(), Ok(Role::Agent));
        assert_eq!(" client ".parse::<Role>(), Ok(Role::Client));
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_unknown_role_is_gated() {
        assert_eq!(Role::from_declared(Some("supervisor")), Role::Client);
        assert_eq!(Role::from_declared(None), Role::Client);
        assert_eq!(Role::from_declared(Some("agent")), Role::Agent);
    }

    #[test]
    fn test_serde_accepts_upper_case() {
        let role: Role = serde_json::from_str("\"AGENT\"").unwrap_or(Role::Client);
        assert_eq!(role, Role::Agent);
        assert_eq!(serde_json::to_string(&Role::Client).unwrap_or_default(), "\"client\"");
    }
}
