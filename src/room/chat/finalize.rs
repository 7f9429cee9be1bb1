//! End-of-call finalization.
//!
//! Steps run in order: drain the room's chat queue, write the export
//! artifact, insert the terminal END record, record the artifact path on
//! that record, mark the consultation completed and announce the end to the
//! room. A failed export or END insert aborts with the drained history put
//! back on the queue, so nothing durable is left behind. A failed
//! path update leaves an END record without a path and is reported in the
//! outcome rather than as an error.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::room::chat::export::ChatExporter;
use crate::room::chat::message::{ChatMessage, ChatMessageType};
use crate::room::chat::queue::ChatQueue;
use crate::room::core::config::{ChatConfig, GateConfig};
use crate::room::core::errors::RoomResult;
use crate::room::core::ids::{ContractId, RoomId};
use crate::room::fanout::broker::RoomBroker;
use crate::room::fanout::events::SyncEvent;
use crate::room::store::consultation_store::{ConsultationStatus, ConsultationStore};

/// Result of a finalize run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    /// Finalized consultation.
    pub contract_id: ContractId,
    /// Id of the END record.
    pub chat_id: i64,
    /// Export artifact.
    pub export_path: PathBuf,
    /// Whether the END record carries the artifact path.
    pub export_path_recorded: bool,
    /// Messages taken from the queue.
    pub drained_count: usize,
    /// Where participants were sent.
    pub redirect_url: String,
}

/// Finalization pipeline.
pub struct FinalizePipeline {
    queue: Arc<ChatQueue>,
    exporter: ChatExporter,
    store: Arc<dyn ConsultationStore>,
    broker: Arc<RoomBroker>,
    end_message: String,
    redirect_url: String,
}

impl FinalizePipeline {
    /// Assemble the pipeline.
    #[must_use]
    pub fn new(
        queue: Arc<ChatQueue>,
        store: Arc<dyn ConsultationStore>,
        broker: Arc<RoomBroker>,
        chat: &ChatConfig,
        gate: &GateConfig,
    ) -> Self {
        Self {
            queue,
            exporter: ChatExporter::new(chat.export_dir.clone()),
            store,
            broker,
            end_message: chat.end_message.clone(),
            redirect_url: gate.end_redirect_url.clone(),
        }
    }

    /// Finalize a consultation's chat.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be drained, the artifact cannot
    /// be written, or the END record cannot be inserted.
    pub async fn finalize(
        &self,
        contract: ContractId,
        terminating_user: &str,
        memo: Option<String>,
    ) -> RoomResult<FinalizeOutcome> {
        info!(%contract, user = terminating_user, "finalizing consultation chat");

        let history = self.queue.drain_and_clear(contract).await?;
        if history.is_empty() {
            warn!(%contract, "no queued chat to export");
        }

        let export_path = match self.exporter.export(contract, &history).await {
            Ok(path) => path,
            Err(err) => {
                error!(%contract, error = %err, "chat export failed, finalize aborted");
                self.restore(contract, &history).await;
                return Err(err);
            }
        };

        let end_record = ChatMessage::server_line(
            contract,
            terminating_user,
            self.end_message.clone(),
            ChatMessageType::End,
        );
        let chat_id = match self.store.insert_chat_message(end_record).await {
            Ok(chat_id) => chat_id,
            Err(err) => {
                error!(%contract, error = %err, "END record not written, finalize aborted");
                self.restore(contract, &history).await;
                return Err(err);
            }
        };

        let export_path_recorded = match self
            .store
            .update_chat_export_path(chat_id, export_path.display().to_string())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                error!(
                    %contract,
                    chat_id,
                    path = %export_path.display(),
                    error = %err,
                    "END record left without export path"
                );
                false
            }
        };

        if let Err(err) = self
            .store
            .update_consultation_status(contract, ConsultationStatus::Completed, memo)
            .await
        {
            warn!(%contract, error = %err, "consultation status not updated");
        }

        let room = RoomId::Contract(contract);
        self.broker.publish(
            &room,
            SyncEvent::End {
                contract_id: contract,
                redirect_url: self.redirect_url.clone(),
                message: Some(self.end_message.clone()),
            },
        );
        self.broker.publish(
            &room,
            SyncEvent::Chat {
                message: ChatMessage::server_line(
                    contract,
                    terminating_user,
                    self.end_message.clone(),
                    ChatMessageType::System,
                ),
            },
        );

        info!(
            %contract,
            chat_id,
            drained = history.len(),
            export_path_recorded,
            "consultation finalized"
        );
        Ok(FinalizeOutcome {
            contract_id: contract,
            chat_id,
            export_path,
            export_path_recorded,
            drained_count: history.len(),
            redirect_url: self.redirect_url.clone(),
        })
    }

    /// Put a drained history back, ahead of newer lines, after an aborted
    /// finalize so that a retry exports the same history.
    async fn restore(&self, contract: ContractId, history: &[ChatMessage]) {
        if history.is_empty() {
            return;
        }
        if let Err(err) = self.queue.requeue_front(contract, history).await {
            warn!(%contract, error = %err, "drained chat could not be restored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::core::config::{FanoutConfig, StorageConfig};
    use crate::room::core::errors::RoomError;
    use crate::room::store::consultation_store::{ConsultationRecord, SqliteConsultationStore};
    use crate::room::store::memory_store::InMemorySharedStore;
    use crate::room::store::shared_store::{SharedStore, StoreFuture};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        pipeline: FinalizePipeline,
        queue: Arc<ChatQueue>,
        broker: Arc<RoomBroker>,
        store: Arc<SqliteConsultationStore>,
        _temp: tempfile::TempDir,
    }

    async fn fixture_with(
        wrap: impl FnOnce(Arc<SqliteConsultationStore>) -> Arc<dyn ConsultationStore>,
        export_dir: Option<PathBuf>,
    ) -> RoomResult<Fixture> {
        let temp = tempfile::tempdir()?;
        let shared: Arc<dyn SharedStore> = Arc::new(InMemorySharedStore::new());
        let queue = Arc::new(ChatQueue::new(shared));
        let store = Arc::new(SqliteConsultationStore::open_in_memory(&StorageConfig::default()).await?);
        let broker = Arc::new(RoomBroker::new(&FanoutConfig::default()));
        let chat = ChatConfig {
            export_dir: export_dir.unwrap_or_else(|| temp.path().join("chat")),
            ..ChatConfig::default()
        };
        let pipeline = FinalizePipeline::new(
            Arc::clone(&queue),
            wrap(Arc::clone(&store)),
            Arc::clone(&broker),
            &chat,
            &GateConfig::default(),
        );
        Ok(Fixture {
            pipeline,
            queue,
            broker,
            store,
            _temp: temp,
        })
    }

    async fn fixture() -> RoomResult<Fixture> {
        fixture_with(|store| store as Arc<dyn ConsultationStore>, None).await
    }

    fn line(content: &str) -> ChatMessage {
        ChatMessage::server_line(ContractId(7), "client", content, ChatMessageType::Chat)
    }

    /// Durable store whose export-path updates always fail.
    struct NoPathUpdates(Arc<SqliteConsultationStore>);

    impl ConsultationStore for NoPathUpdates {
        fn insert_chat_message(&self, message: ChatMessage) -> StoreFuture<'_, RoomResult<i64>> {
            self.0.insert_chat_message(message)
        }
        fn update_chat_export_path(
            &self,
            _chat_id: i64,
            _path: String,
        ) -> StoreFuture<'_, RoomResult<()>> {
            Box::pin(async { Err(RoomError::StoreUnavailable("write timeout".to_string())) })
        }
        fn find_chat_history(
            &self,
            contract_id: ContractId,
        ) -> StoreFuture<'_, RoomResult<Vec<ChatMessage>>> {
            self.0.find_chat_history(contract_id)
        }
        fn latest_export_path(
            &self,
            contract_id: ContractId,
        ) -> StoreFuture<'_, RoomResult<Option<String>>> {
            self.0.latest_export_path(contract_id)
        }
        fn update_consultation_status(
            &self,
            contract_id: ContractId,
            status: ConsultationStatus,
            memo: Option<String>,
        ) -> StoreFuture<'_, RoomResult<()>> {
            self.0.update_consultation_status(contract_id, status, memo)
        }
        fn consultation(
            &self,
            contract_id: ContractId,
        ) -> StoreFuture<'_, RoomResult<Option<ConsultationRecord>>> {
            self.0.consultation(contract_id)
        }
    }

    /// Durable store whose first END insert fails.
    struct FirstInsertFails {
        inner: Arc<SqliteConsultationStore>,
        failed: AtomicBool,
    }

    impl ConsultationStore for FirstInsertFails {
        fn insert_chat_message(&self, message: ChatMessage) -> StoreFuture<'_, RoomResult<i64>> {
            if self.failed.swap(true, Ordering::SeqCst) {
                self.inner.insert_chat_message(message)
            } else {
                Box::pin(async { Err(RoomError::StoreUnavailable("insert timeout".to_string())) })
            }
        }
        fn update_chat_export_path(
            &self,
            chat_id: i64,
            path: String,
        ) -> StoreFuture<'_, RoomResult<()>> {
            self.inner.update_chat_export_path(chat_id, path)
        }
        fn find_chat_history(
            &self,
            contract_id: ContractId,
        ) -> StoreFuture<'_, RoomResult<Vec<ChatMessage>>> {
            self.inner.find_chat_history(contract_id)
        }
        fn latest_export_path(
            &self,
            contract_id: ContractId,
        ) -> StoreFuture<'_, RoomResult<Option<String>>> {
            self.inner.latest_export_path(contract_id)
        }
        fn update_consultation_status(
            &self,
            contract_id: ContractId,
            status: ConsultationStatus,
            memo: Option<String>,
        ) -> StoreFuture<'_, RoomResult<()>> {
            self.inner.update_consultation_status(contract_id, status, memo)
        }
        fn consultation(
            &self,
            contract_id: ContractId,
        ) -> StoreFuture<'_, RoomResult<Option<ConsultationRecord>>> {
            self.inner.consultation(contract_id)
        }
    }

    #[tokio::test]
    async fn test_finalize_exports_records_and_announces() -> RoomResult<()> {
        let fx = fixture().await?;
        fx.queue.enqueue(&line("m1")).await?;
        fx.queue.enqueue(&line("m2")).await?;
        let mut subscription = fx.broker.subscribe(&RoomId::Contract(ContractId(7)));

        let outcome = fx
            .pipeline
            .finalize(ContractId(7), "agent-1", Some("done".to_string()))
            .await?;

        assert_eq!(outcome.drained_count, 2);
        assert!(outcome.export_path_recorded);
        let body = tokio::fs::read_to_string(&outcome.export_path).await?;
        let m1 = body.find("m1").unwrap_or(usize::MAX);
        let m2 = body.find("m2").unwrap_or(0);
        assert!(m1 < m2);

        let history = fx.store.find_chat_history(ContractId(7)).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].chat_id, Some(outcome.chat_id));
        assert_eq!(history[0].message_type, ChatMessageType::End);
        assert_eq!(
            history[0].export_file_path.as_deref(),
            Some(outcome.export_path.display().to_string().as_str())
        );

        let status = fx.store.consultation(ContractId(7)).await?;
        assert_eq!(status.map(|record| record.status), Some(ConsultationStatus::Completed));

        match subscription.recv().await.map(|frame| frame.event.clone()) {
            Some(SyncEvent::End { contract_id, .. }) => assert_eq!(contract_id, ContractId(7)),
            other => panic!("expected end event, got {other:?}"),
        }
        match subscription.recv().await.map(|frame| frame.event.clone()) {
            Some(SyncEvent::Chat { message }) => {
                assert_eq!(message.message_type, ChatMessageType::System);
            }
            other => panic!("expected system chat line, got {other:?}"),
        }
        assert!(fx.queue.peek(ContractId(7)).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_empty_room() -> RoomResult<()> {
        let fx = fixture().await?;
        let outcome = fx.pipeline.finalize(ContractId(7), "agent-1", None).await?;
        assert_eq!(outcome.drained_count, 0);
        let body = tokio::fs::read_to_string(&outcome.export_path).await?;
        assert!(body.contains("Message count: 0"));
        assert_eq!(fx.store.find_chat_history(ContractId(7)).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_path_update_is_degraded_not_fatal() -> RoomResult<()> {
        let fx = fixture_with(
            |store| Arc::new(NoPathUpdates(store)) as Arc<dyn ConsultationStore>,
            None,
        )
        .await?;
        fx.queue.enqueue(&line("m1")).await?;
        let outcome = fx.pipeline.finalize(ContractId(7), "agent-1", None).await?;
        assert!(!outcome.export_path_recorded);
        let history = fx.store.find_chat_history(ContractId(7)).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].export_file_path, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_export_writes_nothing_durable() -> RoomResult<()> {
        let blocker = tempfile::NamedTempFile::new()?;
        let fx = fixture_with(
            |store| store as Arc<dyn ConsultationStore>,
            Some(blocker.path().join("chat")),
        )
        .await?;
        fx.queue.enqueue(&line("keep me")).await?;

        let result = fx.pipeline.finalize(ContractId(7), "agent-1", None).await;
        assert!(matches!(result, Err(RoomError::Export { .. })));
        assert!(fx.store.find_chat_history(ContractId(7)).await?.is_empty());
        assert_eq!(fx.queue.peek(ContractId(7)).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_end_insert_restores_history_for_retry() -> RoomResult<()> {
        let fx = fixture_with(
            |store| {
                Arc::new(FirstInsertFails {
                    inner: store,
                    failed: AtomicBool::new(false),
                }) as Arc<dyn ConsultationStore>
            },
            None,
        )
        .await?;
        fx.queue.enqueue(&line("m1")).await?;
        fx.queue.enqueue(&line("m2")).await?;

        let first = fx.pipeline.finalize(ContractId(7), "agent-1", None).await;
        assert!(matches!(first, Err(RoomError::StoreUnavailable(_))));
        assert!(fx.store.find_chat_history(ContractId(7)).await?.is_empty());
        assert_eq!(fx.queue.peek(ContractId(7)).await?.len(), 2);

        let outcome = fx.pipeline.finalize(ContractId(7), "agent-1", None).await?;
        assert_eq!(outcome.drained_count, 2);
        assert!(outcome.export_path_recorded);
        let artifacts = std::fs::read_dir(fx.pipeline.exporter.export_dir())?.count();
        assert_eq!(artifacts, 1);
        Ok(())
    }
}
