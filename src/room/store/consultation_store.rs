//! Durable consultation store: chat records and consultation status.

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::room::chat::message::{ChatMessage, ChatMessageType};
use crate::room::core::config::StorageConfig;
use crate::room::core::errors::{RoomError, RoomResult};
use crate::room::core::ids::{ContractId, SessionId};
use crate::room::store::shared_store::StoreFuture;

/// Lifecycle status of a consultation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsultationStatus {
    /// Call in progress.
    InProgress,
    /// Call ended and finalized.
    Completed,
}

impl ConsultationStatus {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Stored status row for a consultation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationRecord {
    /// Consultation id.
    pub contract_id: ContractId,
    /// Current status.
    pub status: ConsultationStatus,
    /// Memo left when the call ended.
    pub memo: Option<String>,
}

/// Durable store trait.
pub trait ConsultationStore: Send + Sync {
    /// Insert a chat record and return its new id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn insert_chat_message(&self, message: ChatMessage) -> StoreFuture<'_, RoomResult<i64>>;

    /// Record the export artifact path on a chat record.
    ///
    /// # Errors
    /// Returns [`RoomError::RecordNotFound`] if no record has this id, or an
    /// error if storage access fails.
    fn update_chat_export_path(
        &self,
        chat_id: i64,
        path: String,
    ) -> StoreFuture<'_, RoomResult<()>>;

    /// Chat records of a consultation in insertion order.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_chat_history(
        &self,
        contract_id: ContractId,
    ) -> StoreFuture<'_, RoomResult<Vec<ChatMessage>>>;

    /// Most recently recorded export path of a consultation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn latest_export_path(
        &self,
        contract_id: ContractId,
    ) -> StoreFuture<'_, RoomResult<Option<String>>>;

    /// Set a consultation's status, keeping the previous memo when none is given.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn update_consultation_status(
        &self,
        contract_id: ContractId,
        status: ConsultationStatus,
        memo: Option<String>,
    ) -> StoreFuture<'_, RoomResult<()>>;

    /// Current status row of a consultation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn consultation(
        &self,
        contract_id: ContractId,
    ) -> StoreFuture<'_, RoomResult<Option<ConsultationRecord>>>;
}

/// `SQLite` implementation of the durable store.
pub struct SqliteConsultationStore {
    conn: Connection,
    chat_table: String,
    consultation_table: String,
}

type ChatRow = (
    i64,
    i64,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
    i64,
    Option<String>,
);

impl SqliteConsultationStore {
    /// Open (or create) the database at the configured path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> RoomResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::with_connection(conn, config).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub async fn open_in_memory(config: &StorageConfig) -> RoomResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn, config).await
    }

    async fn with_connection(conn: Connection, config: &StorageConfig) -> RoomResult<Self> {
        let chat_table = config.chat_table.clone();
        let consultation_table = config.consultation_table.clone();
        let chat_name = chat_table.clone();
        let consultation_name = consultation_table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {chat_name} (
                    chat_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    contract_id INTEGER NOT NULL,
                    session_id TEXT,
                    sender TEXT NOT NULL,
                    sender_name TEXT,
                    content TEXT NOT NULL,
                    message_type TEXT NOT NULL,
                    sent_at INTEGER NOT NULL,
                    export_file_path TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_{chat_name}_contract
                    ON {chat_name} (contract_id, chat_id);
                CREATE TABLE IF NOT EXISTS {consultation_name} (
                    contract_id INTEGER PRIMARY KEY,
                    status TEXT NOT NULL,
                    memo TEXT,
                    updated_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            chat_table,
            consultation_table,
        })
    }
}

fn chat_from_row(row: ChatRow) -> RoomResult<ChatMessage> {
    let (chat_id, contract_id, session_id, sender, sender_name, content, kind, sent_at, path) =
        row;
    let sent_at = Utc
        .timestamp_millis_opt(sent_at)
        .single()
        .ok_or_else(|| RoomError::CorruptRecord(format!("chat {chat_id} has invalid sent_at")))?;
    let message_type = ChatMessageType::parse(&kind).ok_or_else(|| {
        RoomError::CorruptRecord(format!("chat {chat_id} has unknown type {kind}"))
    })?;
    Ok(ChatMessage {
        chat_id: Some(chat_id),
        room_id: ContractId(contract_id),
        session_id: session_id.map(SessionId::new),
        sender,
        sender_name,
        content,
        message_type,
        sent_at,
        export_file_path: path,
    })
}

impl ConsultationStore for SqliteConsultationStore {
    fn insert_chat_message(&self, message: ChatMessage) -> StoreFuture<'_, RoomResult<i64>> {
        Box::pin(async move {
            let table = self.chat_table.clone();
            let chat_id = self
                .conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table}
                            (contract_id, session_id, sender, sender_name, content,
                             message_type, sent_at, export_file_path)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                        ),
                        rusqlite::params![
                            message.room_id.get(),
                            message.session_id.as_ref().map(SessionId::as_str),
                            message.sender,
                            message.sender_name,
                            message.content,
                            message.message_type.as_str(),
                            message.sent_at.timestamp_millis(),
                            message.export_file_path
                        ],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await?;
            Ok(chat_id)
        })
    }

    fn update_chat_export_path(
        &self,
        chat_id: i64,
        path: String,
    ) -> StoreFuture<'_, RoomResult<()>> {
        Box::pin(async move {
            let table = self.chat_table.clone();
            let updated = self
                .conn
                .call(move |conn| {
                    let updated = conn.execute(
                        &format!("UPDATE {table} SET export_file_path = ?1 WHERE chat_id = ?2"),
                        rusqlite::params![path, chat_id],
                    )?;
                    Ok(updated)
                })
                .await?;
            if updated == 0 {
                return Err(RoomError::RecordNotFound(format!("chat {chat_id}")));
            }
            Ok(())
        })
    }

    fn find_chat_history(
        &self,
        contract_id: ContractId,
    ) -> StoreFuture<'_, RoomResult<Vec<ChatMessage>>> {
        Box::pin(async move {
            let table = self.chat_table.clone();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT chat_id, contract_id, session_id, sender, sender_name, content,
                                message_type, sent_at, export_file_path
                         FROM {table}
                         WHERE contract_id = ?1
                         ORDER BY chat_id"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![contract_id.get()], |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                                row.get(5)?,
                                row.get(6)?,
                                row.get(7)?,
                                row.get(8)?,
                            ))
                        })?
                        .collect::<Result<Vec<ChatRow>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter().map(chat_from_row).collect()
        })
    }

    fn latest_export_path(
        &self,
        contract_id: ContractId,
    ) -> StoreFuture<'_, RoomResult<Option<String>>> {
        Box::pin(async move {
            let table = self.chat_table.clone();
            let path = self
                .conn
                .call(move |conn| {
                    let path = conn
                        .query_row(
                            &format!(
                                "SELECT export_file_path FROM {table}
                                 WHERE contract_id = ?1 AND export_file_path IS NOT NULL
                                 ORDER BY chat_id DESC
                                 LIMIT 1"
                            ),
                            rusqlite::params![contract_id.get()],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(path)
                })
                .await?;
            Ok(path)
        })
    }

    fn update_consultation_status(
        &self,
        contract_id: ContractId,
        status: ConsultationStatus,
        memo: Option<String>,
    ) -> StoreFuture<'_, RoomResult<()>> {
        Box::pin(async move {
            let table = self.consultation_table.clone();
            let now = Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (contract_id, status, memo, updated_at)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(contract_id) DO UPDATE SET
                                status = excluded.status,
                                memo = COALESCE(excluded.memo, {table}.memo),
                                updated_at = excluded.updated_at"
                        ),
                        rusqlite::params![contract_id.get(), status.as_str(), memo, now],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn consultation(
        &self,
        contract_id: ContractId,
    ) -> StoreFuture<'_, RoomResult<Option<ConsultationRecord>>> {
        Box::pin(async move {
            let table = self.consultation_table.clone();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT status, memo FROM {table} WHERE contract_id = ?1"),
                            rusqlite::params![contract_id.get()],
                            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;

            row.map(|(status, memo)| {
                let status = ConsultationStatus::parse(&status).ok_or_else(|| {
                    RoomError::CorruptRecord(format!(
                        "consultation {contract_id} has unknown status {status}"
                    ))
                })?;
                Ok(ConsultationRecord {
                    contract_id,
                    status,
                    memo,
                })
            })
            .transpose()
        })
    }
}
