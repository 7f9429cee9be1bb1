//! Configuration for the consultation room subsystem.

use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::room::core::errors::{RoomError, RoomResult};

/// Top-level configuration for the room coordinator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Session-contract mapping settings.
    pub mapping: MappingConfig,
    /// Chat queue and export settings.
    pub chat: ChatConfig,
    /// Durable storage settings.
    pub storage: StorageConfig,
    /// Fan-out settings.
    pub fanout: FanoutConfig,
    /// Entry gate and redirect settings.
    pub gate: GateConfig,
    /// Shared store sweep settings.
    pub sweep: SweepConfig,
}

impl RoomConfig {
    /// Build the default configuration overlaid with `CONSULT_*` environment
    /// variables.
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> RoomResult<Self> {
        let mut config = Self::default();

        if let Some(hours) = env_parse::<u64>("CONSULT_SESSION_TTL_HOURS")? {
            config.mapping.ttl_hours = hours;
        }
        if let Ok(pattern) = std::env::var("CONSULT_SESSION_ID_PATTERN") {
            config.mapping.session_id_pattern = pattern;
        }
        if let Ok(dir) = std::env::var("CONSULT_CHAT_EXPORT_DIR") {
            config.chat.export_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("CONSULT_SQLITE_PATH") {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(capacity) = env_parse::<usize>("CONSULT_CHANNEL_CAPACITY")? {
            config.fanout.channel_capacity = capacity;
        }
        if let Ok(path) = std::env::var("CONSULT_WAITING_ROOM_PATH") {
            config.gate.waiting_room_path = path;
        }
        if let Ok(url) = std::env::var("CONSULT_END_REDIRECT_URL") {
            config.gate.end_redirect_url = url;
        }
        if let Some(seconds) = env_parse::<u64>("CONSULT_SWEEP_INTERVAL_SECONDS")? {
            config.sweep.interval_seconds = seconds;
        }
        if let Some(enabled) = env_parse::<bool>("CONSULT_SWEEP_ENABLED")? {
            config.sweep.enabled = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> RoomResult<()> {
        if self.mapping.ttl_hours == 0 {
            return Err(RoomError::InvalidConfig(
                "mapping.ttl_hours must be > 0".to_string(),
            ));
        }

        Regex::new(&self.mapping.session_id_pattern)?;

        if self.fanout.channel_capacity == 0 {
            return Err(RoomError::InvalidConfig(
                "fanout.channel_capacity must be > 0".to_string(),
            ));
        }

        if !self.gate.waiting_room_path.starts_with('/') {
            return Err(RoomError::InvalidConfig(
                "gate.waiting_room_path must be an absolute path".to_string(),
            ));
        }

        if self.gate.end_redirect_url.is_empty() {
            return Err(RoomError::InvalidConfig(
                "gate.end_redirect_url must not be empty".to_string(),
            ));
        }

        if self.storage.chat_table.is_empty() || self.storage.consultation_table.is_empty() {
            return Err(RoomError::InvalidConfig(
                "storage table names must not be empty".to_string(),
            ));
        }

        if self.sweep.enabled && self.sweep.interval_seconds == 0 {
            return Err(RoomError::InvalidConfig(
                "sweep.interval_seconds must be > 0 when the sweeper is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> RoomResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RoomError::InvalidConfig(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

/// Session-contract mapping settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Lifetime of both mapping directions, in hours.
    pub ttl_hours: u64,
    /// Accepted shape of transport session identifiers.
    pub session_id_pattern: String,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            session_id_pattern: r"^[A-Za-z0-9][A-Za-z0-9_.:\-]{0,127}$".to_string(),
        }
    }
}

/// Chat queue and export settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Directory receiving chat export artifacts.
    pub export_dir: PathBuf,
    /// Content of the terminal END record.
    pub end_message: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("./upload/chat"),
            end_message: "The call has ended and the chat history was exported.".to_string(),
        }
    }
}

/// Durable storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Chat record table name.
    pub chat_table: String,
    /// Consultation status table name.
    pub consultation_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("consult.sqlite"),
            chat_table: "consult_chat".to_string(),
            consultation_table: "consult_consultation".to_string(),
        }
    }
}

/// Fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Per-room buffered events before slow subscribers start losing them.
    pub channel_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Entry gate and redirect settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateConfig {
    /// Where clients wait until an agent is present.
    pub waiting_room_path: String,
    /// Where participants go once a consultation ends.
    pub end_redirect_url: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            waiting_room_path: "/waiting-room".to_string(),
            end_redirect_url: "/".to_string(),
        }
    }
}

/// Shared store sweep settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweeps (in seconds).
    pub interval_seconds: u64,
    /// Whether the sweeper runs at all.
    pub enabled: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RoomConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mapping.ttl_hours, 24);
        assert_eq!(config.gate.waiting_room_path, "/waiting-room");
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = RoomConfig::default();
        config.mapping.ttl_hours = 0;
        assert!(matches!(config.validate(), Err(RoomError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_session_pattern_rejected() {
        let mut config = RoomConfig::default();
        config.mapping.session_id_pattern = "([".to_string();
        assert!(matches!(config.validate(), Err(RoomError::Regex(_))));
    }

    #[test]
    fn test_relative_waiting_room_rejected() {
        let mut config = RoomConfig::default();
        config.gate.waiting_room_path = "waiting".to_string();
        assert!(config.validate().is_err());
    }
}
