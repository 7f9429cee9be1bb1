//! Error types for the consultation room subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Room subsystem error type.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Malformed session or room identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    /// Event payload failed validation at the fan-out boundary.
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    /// Shared ephemeral store could not be reached or rejected the operation.
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(String),
    /// Store key holds a value of a different kind than the operation expects.
    #[error("store key {0} holds a different value type")]
    WrongType(String),
    /// Durable record does not exist.
    #[error("record not found: {0}")]
    RecordNotFound(String),
    /// Durable record holds a value this build cannot interpret.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    /// Session has no live consultation mapping.
    #[error("session {0} is not mapped to a consultation")]
    SessionNotMapped(String),
    /// Chat export artifact could not be written.
    #[error("chat export failed for {path}: {source}")]
    Export {
        /// Target artifact path.
        path: PathBuf,
        /// Underlying filesystem error.
        source: std::io::Error,
    },
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RoomError {
    /// Check if the caller may retry the failed operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::TokioSqlite(_))
    }

    /// Check if the error was caused by bad caller input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier(_)
                | Self::InvalidEvent(_)
                | Self::SessionNotMapped(_)
                | Self::Serialization(_)
        )
    }
}

/// Convenience result alias for room operations.
pub type RoomResult<T> = Result<T, RoomError>;
