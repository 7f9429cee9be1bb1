//! Chat export artifacts.
//!
//! An artifact is a plain-text transcript named
//! `chat_<room>_<yyyyMMdd_HHmmss>_<hash>.txt`, where the hash covers the
//! exported messages. Exporting a non-empty history whose artifact already
//! exists reuses that file instead of writing a duplicate.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::room::chat::message::ChatMessage;
use crate::room::core::errors::{RoomError, RoomResult};
use crate::room::core::ids::ContractId;

const LINE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
const RULE: &str = "================================";

/// Content hash of a message history.
///
/// Built on `DefaultHasher`, so values only agree within one build; artifacts
/// written by another build are not reused.
#[must_use]
pub fn history_hash(messages: &[ChatMessage]) -> String {
    let mut hasher = DefaultHasher::new();
    for message in messages {
        message.sender.hash(&mut hasher);
        message.display_sender().hash(&mut hasher);
        message.content.hash(&mut hasher);
        message.sent_at.timestamp_millis().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

/// Render a history as the artifact body.
#[must_use]
pub fn render_transcript(
    room: ContractId,
    messages: &[ChatMessage],
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Consultation chat transcript ===");
    let _ = writeln!(out, "Contract ID: {room}");
    let _ = writeln!(out, "Generated at: {}", generated_at.format(LINE_TIME_FORMAT));
    let _ = writeln!(out, "Message count: {}", messages.len());
    let _ = writeln!(out, "{RULE}");
    out.push('\n');
    for message in messages {
        let _ = writeln!(
            out,
            "[{}] {}: {}",
            message.sent_at.format(LINE_TIME_FORMAT),
            message.display_sender(),
            message.content
        );
    }
    out.push('\n');
    out.push_str("=== End of transcript ===\n");
    out
}

/// Writes chat artifacts into one directory.
#[derive(Debug, Clone)]
pub struct ChatExporter {
    export_dir: PathBuf,
}

impl ChatExporter {
    /// Create an exporter writing into `export_dir`.
    #[must_use]
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    /// Directory receiving artifacts.
    #[must_use]
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Write the artifact for a drained history and return its path.
    ///
    /// # Errors
    /// Returns [`RoomError::Export`] if the directory or file cannot be
    /// written.
    pub async fn export(&self, room: ContractId, messages: &[ChatMessage]) -> RoomResult<PathBuf> {
        let dir = self.export_dir.as_path();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| RoomError::Export {
                path: dir.to_path_buf(),
                source,
            })?;

        let hash = history_hash(messages);
        if !messages.is_empty() {
            if let Some(existing) = self.find_existing(room, &hash).await? {
                info!(%room, path = %existing.display(), "reusing existing chat export");
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let path = dir.join(format!(
            "chat_{room}_{}_{hash}.txt",
            now.format(FILE_TIME_FORMAT)
        ));
        let body = render_transcript(room, messages, now);
        match write_new(&path, body.as_bytes()).await {
            Ok(()) => {}
            // Same room, second and content: the artifact is already there.
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(%room, path = %path.display(), "export already present");
            }
            Err(source) => {
                return Err(RoomError::Export {
                    path: path.clone(),
                    source,
                });
            }
        }

        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        info!(%room, path = %path.display(), messages = messages.len(), "chat export written");
        Ok(path)
    }

    async fn find_existing(&self, room: ContractId, hash: &str) -> RoomResult<Option<PathBuf>> {
        let prefix = format!("chat_{room}_");
        let suffix = format!("_{hash}.txt");
        let mut entries =
            tokio::fs::read_dir(&self.export_dir)
                .await
                .map_err(|source| RoomError::Export {
                    path: self.export_dir.clone(),
                    source,
                })?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(&prefix) && name.ends_with(&suffix) {
                debug!(%room, name, "matching export found");
                let path = entry.path();
                return Ok(Some(tokio::fs::canonicalize(&path).await.unwrap_or(path)));
            }
        }
        Ok(None)
    }
}

async fn write_new(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(body).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::chat::message::ChatMessageType;
    use chrono::TimeZone;

    fn line(content: &str, second: u32) -> ChatMessage {
        let mut message =
            ChatMessage::server_line(ContractId(12), "agent", content, ChatMessageType::Chat);
        message.sender_name = Some("Kim".to_string());
        message.sent_at = Utc
            .with_ymd_and_hms(2025, 3, 1, 9, 30, second)
            .single()
            .unwrap_or_else(Utc::now);
        message
    }

    #[test]
    fn test_render_format() {
        let generated = Utc
            .with_ymd_and_hms(2025, 3, 1, 10, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let body = render_transcript(ContractId(12), &[line("hello", 5)], generated);
        assert!(body.contains("Contract ID: 12"));
        assert!(body.contains("Message count: 1"));
        assert!(body.contains("[2025-03-01 09:30:05] Kim: hello\n"));
        assert!(body.ends_with("=== End of transcript ===\n"));
    }

    #[test]
    fn test_hash_tracks_content() {
        let first = history_hash(&[line("a", 1), line("b", 2)]);
        assert_eq!(first, history_hash(&[line("a", 1), line("b", 2)]));
        assert_ne!(first, history_hash(&[line("b", 2), line("a", 1)]));
    }

    #[tokio::test]
    async fn test_export_creates_directory_and_file() -> RoomResult<()> {
        let temp = tempfile::tempdir()?;
        let exporter = ChatExporter::new(temp.path().join("nested/chat"));
        let path = exporter.export(ContractId(12), &[line("m1", 1), line("m2", 2)]).await?;

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("chat_12_"));
        assert!(name.ends_with(".txt"));
        let body = tokio::fs::read_to_string(&path).await?;
        let first = body.find("m1").unwrap_or(usize::MAX);
        let second = body.find("m2").unwrap_or(0);
        assert!(first < second);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_history_reuses_artifact() -> RoomResult<()> {
        let temp = tempfile::tempdir()?;
        let exporter = ChatExporter::new(temp.path());
        let history = [line("again", 1)];
        let first = exporter.export(ContractId(12), &history).await?;
        let second = exporter.export(ContractId(12), &history).await?;
        assert_eq!(first, second);
        assert_eq!(std::fs::read_dir(temp.path())?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails() -> RoomResult<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, b"x")?;
        let exporter = ChatExporter::new(blocker.join("chat"));
        let result = exporter.export(ContractId(1), &[]).await;
        assert!(matches!(result, Err(RoomError::Export { .. })));
        Ok(())
    }
}
