//! Chat message records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::core::ids::{ContractId, SessionId};
use crate::room::core::role::Role;

/// Kind of chat line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatMessageType {
    /// Regular chat line.
    #[default]
    Chat,
    /// Participant joined.
    Join,
    /// Participant left.
    Leave,
    /// Server announcement.
    System,
    /// Terminal record written once per finalized room.
    End,
}

impl ChatMessageType {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
            Self::System => "SYSTEM",
            Self::End => "END",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CHAT" => Some(Self::Chat),
            "JOIN" => Some(Self::Join),
            "LEAVE" => Some(Self::Leave),
            "SYSTEM" => Some(Self::System),
            "END" => Some(Self::End),
            _ => None,
        }
    }

    /// Whether lines of this kind belong in the room's chat queue.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Chat | Self::Join)
    }
}

/// A chat line as queued, broadcast and persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Durable id, assigned only to the terminal END record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    /// Consultation the line belongs to.
    pub room_id: ContractId,
    /// Transport session that produced the line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Sender identifier.
    pub sender: String,
    /// Display name of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Message body.
    pub content: String,
    /// Line kind.
    #[serde(rename = "type")]
    pub message_type: ChatMessageType,
    /// Send time.
    pub sent_at: DateTime<Utc>,
    /// Export artifact path, only on the END record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_file_path: Option<String>,
}

impl ChatMessage {
    /// Build a server-originated line of the given kind.
    #[must_use]
    pub fn server_line(
        room_id: ContractId,
        sender: impl Into<String>,
        content: impl Into<String>,
        message_type: ChatMessageType,
    ) -> Self {
        let sender = sender.into();
        Self {
            chat_id: None,
            room_id,
            session_id: None,
            sender_name: Some(sender.clone()),
            sender,
            content: content.into(),
            message_type,
            sent_at: Utc::now(),
            export_file_path: None,
        }
    }

    /// Name shown for the sender, falling back to the raw sender id.
    #[must_use]
    pub fn display_sender(&self) -> &str {
        self.sender_name.as_deref().unwrap_or(&self.sender)
    }
}

/// Chat line as submitted by a participant; missing fields get defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDraft {
    /// Sender identifier; defaults to the connection user.
    #[serde(default)]
    pub sender: Option<String>,
    /// Display name; defaults from the sender role.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Message body.
    #[serde(default)]
    pub content: String,
    /// Line kind; defaults to CHAT.
    #[serde(default, rename = "type")]
    pub message_type: Option<ChatMessageType>,
    /// Client send time; defaults to now.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatDraft {
    /// Fill defaults and bind the draft to a consultation.
    #[must_use]
    pub fn into_message(
        self,
        room_id: ContractId,
        session_id: Option<SessionId>,
        fallback_sender: &str,
        role: Role,
    ) -> ChatMessage {
        let sender = self
            .sender
            .filter(|sender| !sender.trim().is_empty())
            .unwrap_or_else(|| fallback_sender.to_string());
        let sender_name = self
            .sender_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| role.display_name().to_string());
        ChatMessage {
            chat_id: None,
            room_id,
            session_id,
            sender,
            sender_name: Some(sender_name),
            content: self.content,
            message_type: self.message_type.unwrap_or_default(),
            sent_at: self.timestamp.unwrap_or_else(Utc::now),
            export_file_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_defaults() {
        let draft: ChatDraft = serde_json::from_str(r#"{"content":"hello"}"#)
            .unwrap_or_default();
        let message = draft.into_message(ContractId(3), None, "client-7", Role::Client);
        assert_eq!(message.sender, "client-7");
        assert_eq!(message.display_sender(), "Client");
        assert_eq!(message.message_type, ChatMessageType::Chat);
        assert_eq!(message.content, "hello");
    }

    #[test]
    fn test_wire_shape() -> Result<(), serde_json::Error> {
        let message =
            ChatMessage::server_line(ContractId(5), "Agent", "joined.", ChatMessageType::Join);
        let value = serde_json::to_value(&message)?;
        assert_eq!(value["type"], "JOIN");
        assert_eq!(value["roomId"], 5);
        assert!(value.get("chatId").is_none());
        Ok(())
    }

    #[test]
    fn test_type_storage_names() {
        for kind in [
            ChatMessageType::Chat,
            ChatMessageType::Join,
            ChatMessageType::Leave,
            ChatMessageType::System,
            ChatMessageType::End,
        ] {
            assert_eq!(ChatMessageType::parse(kind.as_str()), Some(kind));
        }
        assert!(ChatMessageType::Join.is_queued());
        assert!(!ChatMessageType::System.is_queued());
    }
}
