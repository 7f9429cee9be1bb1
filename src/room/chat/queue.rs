//! Append-only chat queue per consultation, held in the shared store.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::room::chat::message::ChatMessage;
use crate::room::core::errors::RoomResult;
use crate::room::core::ids::ContractId;
use crate::room::store::shared_store::SharedStore;

const ROOM_PREFIX: &str = "chat:room:";
const PENDING_ROOMS_KEY: &str = "chat:rooms:pending";

fn room_key(room: ContractId) -> String {
    format!("{ROOM_PREFIX}{room}")
}

/// Room-scoped chat queue.
pub struct ChatQueue {
    store: Arc<dyn SharedStore>,
}

impl ChatQueue {
    /// Create a queue over a shared store.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Append a message to its room's queue. Returns the queue length.
    ///
    /// # Errors
    /// Returns an error if the message cannot be serialized or the store
    /// rejects the write.
    pub async fn enqueue(&self, message: &ChatMessage) -> RoomResult<usize> {
        let payload = serde_json::to_string(message)?;
        let length = self
            .store
            .list_push(&room_key(message.room_id), payload)
            .await?;
        self.store
            .set_add(PENDING_ROOMS_KEY, message.room_id.to_string())
            .await?;
        debug!(room = %message.room_id, length, "chat message queued");
        Ok(length)
    }

    /// Queued messages of a room, oldest first, without removing them.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn peek(&self, room: ContractId) -> RoomResult<Vec<ChatMessage>> {
        let raw = self.store.list_range(&room_key(room)).await?;
        Ok(decode(room, raw))
    }

    /// Read a room's whole queue, then delete it.
    ///
    /// Messages appended between the read and the delete are lost.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn drain_and_clear(&self, room: ContractId) -> RoomResult<Vec<ChatMessage>> {
        let key = room_key(room);
        let raw = self.store.list_range(&key).await?;
        self.store.delete(&key).await?;
        self.store
            .set_remove(PENDING_ROOMS_KEY, &room.to_string())
            .await?;
        debug!(%room, drained = raw.len(), "chat queue drained");
        Ok(decode(room, raw))
    }

    /// Put a drained history back ahead of lines queued since the drain.
    ///
    /// Lines appended while the requeue itself runs can still land behind
    /// the restored history. Returns the queue length.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn requeue_front(
        &self,
        room: ContractId,
        history: &[ChatMessage],
    ) -> RoomResult<usize> {
        let newer = self.drain_and_clear(room).await?;
        let mut length = 0;
        for message in history.iter().chain(&newer) {
            length = self.enqueue(message).await?;
        }
        debug!(%room, restored = history.len(), newer = newer.len(), "chat queue restored");
        Ok(length)
    }

    /// Rooms with queued messages that were never drained.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn pending_rooms(&self) -> RoomResult<Vec<ContractId>> {
        let members = self.store.set_members(PENDING_ROOMS_KEY).await?;
        Ok(members
            .iter()
            .filter_map(|member| member.parse().ok())
            .collect())
    }
}

fn decode(room: ContractId, raw: Vec<String>) -> Vec<ChatMessage> {
    raw.into_iter()
        .filter_map(|entry| match serde_json::from_str(&entry) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(%room, error = %err, "unreadable queued chat entry skipped");
                None
            }
        })
        .collect()
}
