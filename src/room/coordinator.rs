//! Room coordinator: the single entry point used by the transport layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::room::chat::finalize::{FinalizeOutcome, FinalizePipeline};
use crate::room::chat::message::{ChatDraft, ChatMessage, ChatMessageType};
use crate::room::chat::queue::ChatQueue;
use crate::room::core::config::RoomConfig;
use crate::room::core::errors::{RoomError, RoomResult};
use crate::room::core::ids::{ContractId, RoomId, SessionId};
use crate::room::core::role::Role;
use crate::room::fanout::broker::{RoomBroker, RoomSubscription};
use crate::room::fanout::events::{SyncEvent, WebRtcSignal};
use crate::room::fanout::signaling::SignalRelay;
use crate::room::mapping::mapper::{SessionContractMapper, SessionMapping};
use crate::room::presence::gate::{EntryGate, GateDecision};
use crate::room::presence::tracker::{PresenceArena, PresenceSnapshot};
use crate::room::store::consultation_store::{ConsultationStatus, ConsultationStore};
use crate::room::store::shared_store::SharedStore;

/// Identity attached to everything a connection sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    /// User identifier.
    pub user: String,
    /// Declared role.
    pub role: Role,
    /// Transport session, when known.
    pub session: Option<SessionId>,
}

/// Request to join a consultation with a transport session.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Transport session.
    pub session_id: SessionId,
    /// Consultation to join.
    pub contract_id: ContractId,
    /// Declared role; unknown values are treated as client.
    #[serde(default)]
    pub role: Option<String>,
}

/// Result of a join request.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    /// Gate decision.
    pub decision: GateDecision,
    /// Mapping written for admitted callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<SessionMapping>,
}

/// Presence as reported to pollers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    /// Whether an agent is present.
    pub present: bool,
    /// Agent count.
    pub active_count: u32,
    /// Most recently announced agent session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Coordinates presence, mapping, fan-out and chat for all rooms.
pub struct RoomCoordinator {
    presence: Arc<PresenceArena>,
    gate: EntryGate,
    mapper: SessionContractMapper,
    broker: Arc<RoomBroker>,
    signals: SignalRelay,
    chat: Arc<ChatQueue>,
    finalizer: FinalizePipeline,
    durable: Arc<dyn ConsultationStore>,
}

impl RoomCoordinator {
    /// Wire a coordinator over the given stores.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &RoomConfig,
        shared: Arc<dyn SharedStore>,
        durable: Arc<dyn ConsultationStore>,
    ) -> RoomResult<Self> {
        config.validate()?;
        let presence = Arc::new(PresenceArena::new());
        let broker = Arc::new(RoomBroker::new(&config.fanout));
        let chat = Arc::new(ChatQueue::new(Arc::clone(&shared)));
        let finalizer = FinalizePipeline::new(
            Arc::clone(&chat),
            Arc::clone(&durable),
            Arc::clone(&broker),
            &config.chat,
            &config.gate,
        );
        Ok(Self {
            gate: EntryGate::new(Arc::clone(&presence), &config.gate),
            mapper: SessionContractMapper::new(shared, &config.mapping)?,
            signals: SignalRelay::new(Arc::clone(&broker)),
            presence,
            broker,
            chat,
            finalizer,
            durable,
        })
    }

    /// Presence arena shared with maintenance tasks.
    #[must_use]
    pub fn presence(&self) -> Arc<PresenceArena> {
        Arc::clone(&self.presence)
    }

    /// Broker shared with maintenance tasks.
    #[must_use]
    pub fn broker(&self) -> Arc<RoomBroker> {
        Arc::clone(&self.broker)
    }

    /// Session mapper.
    #[must_use]
    pub const fn mapper(&self) -> &SessionContractMapper {
        &self.mapper
    }

    /// Resolve a path segment to a room.
    ///
    /// Integers are contract ids. Other segments are session ids, resolved
    /// through the mapper when possible and kept as a transient session room
    /// otherwise.
    pub async fn resolve_room(&self, segment: &str) -> RoomId {
        match RoomId::from_segment(segment) {
            RoomId::Session(session) => match self.mapper.get_contract_id(&session).await {
                Some(contract) => {
                    debug!(%session, %contract, "session segment resolved");
                    RoomId::Contract(contract)
                }
                None => RoomId::Session(session),
            },
            resolved @ RoomId::Contract(_) => resolved,
        }
    }

    /// Gate an entry attempt.
    pub fn enter(&self, room: &RoomId, role: Role, contract: Option<ContractId>) -> GateDecision {
        self.gate.admit(room, role, contract)
    }

    /// Gate a caller into a consultation and map its session.
    ///
    /// # Errors
    /// Returns an error if the mapping cannot be written.
    pub async fn join(&self, request: JoinRequest) -> RoomResult<JoinOutcome> {
        let role = Role::from_declared(request.role.as_deref());
        let room = RoomId::Contract(request.contract_id);
        let decision = self.gate.admit_session(
            &room,
            role,
            Some(request.contract_id),
            Some(&request.session_id),
        );
        if !decision.is_admitted() {
            return Ok(JoinOutcome {
                decision,
                mapping: None,
            });
        }

        let mapping = match self
            .mapper
            .create_mapping(&request.session_id, request.contract_id, role)
            .await
        {
            Ok(mapping) => mapping,
            Err(err) => {
                if role == Role::Agent {
                    self.presence
                        .update(&room, false, Some(request.session_id.clone()));
                }
                return Err(err);
            }
        };
        if let Err(err) = self
            .durable
            .update_consultation_status(request.contract_id, ConsultationStatus::InProgress, None)
            .await
        {
            warn!(contract = %request.contract_id, error = %err, "consultation status not updated");
        }

        Ok(JoinOutcome {
            decision,
            mapping: Some(mapping),
        })
    }

    /// Register a participant whose connection just opened.
    ///
    /// Agents are counted as present under their session, so a session that
    /// already joined is not counted twice. Everyone gets a JOIN line.
    ///
    /// # Errors
    /// Returns an error if the JOIN line cannot be queued.
    pub async fn connect(
        &self,
        room: &RoomId,
        participant: &Participant,
    ) -> RoomResult<Option<ChatMessage>> {
        if participant.role == Role::Agent {
            self.presence
                .update(room, true, participant.session.clone());
        }
        self.announce_join(room, participant).await
    }

    /// Release what a participant held in a room when its connection ends.
    pub async fn leave(&self, room: &RoomId, participant: &Participant) {
        if participant.role == Role::Agent {
            self.presence
                .update(room, false, participant.session.clone());
        }
        if let Some(session) = &participant.session {
            if let Err(err) = self.mapper.remove_mapping(session).await {
                warn!(%room, %session, error = %err, "mapping not removed on leave");
            }
        }
        info!(%room, user = %participant.user, role = %participant.role, "participant left");
    }

    /// Subscribe to a room's events.
    #[must_use]
    pub fn subscribe(&self, room: &RoomId) -> RoomSubscription {
        self.broker.subscribe(room)
    }

    /// Publish a participant event.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidEvent`] for invalid events and for kinds
    /// that have their own path (`end`, `rtc`, `chat`).
    pub fn publish(&self, room: &RoomId, event: SyncEvent) -> RoomResult<usize> {
        event.validate()?;
        if !event.is_participant_publishable() {
            return Err(RoomError::InvalidEvent(format!(
                "{} cannot be published directly",
                event.kind()
            )));
        }
        Ok(self.broker.publish(room, event))
    }

    /// Publish an event given as a topic name and the variant's fields.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidEvent`] if the topic or body is invalid.
    pub fn publish_topic(
        &self,
        room: &RoomId,
        topic: &str,
        body: serde_json::Value,
    ) -> RoomResult<usize> {
        let event = SyncEvent::from_topic(topic, body)?;
        self.publish(room, event)
    }

    /// Relay a WebRTC signal.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidEvent`] if the signal is malformed.
    pub fn relay_signal(&self, room: &RoomId, signal: WebRtcSignal) -> RoomResult<WebRtcSignal> {
        SyncEvent::Rtc {
            signal: signal.clone(),
        }
        .validate()?;
        Ok(self.signals.relay(room, signal))
    }

    /// Forget a signaling participant whose connection ended without `leave`.
    pub fn drop_signal_participant(&self, room: &RoomId) -> u32 {
        self.signals.drop_participant(room)
    }

    /// Signaling participants in a room.
    #[must_use]
    pub fn signal_participants(&self, room: &RoomId) -> u32 {
        self.signals.participants().count(room)
    }

    /// Send a chat line.
    ///
    /// The consultation is taken from the room, or else from the sender's
    /// session mapping; lines for unresolved rooms are dropped. Blank CHAT
    /// lines are ignored and END or SYSTEM lines are rejected. CHAT and JOIN
    /// lines are queued for export, LEAVE lines are only broadcast. Returns
    /// the broadcast message, if any.
    ///
    /// # Errors
    /// Returns an error if a queued line cannot be written to the store.
    pub async fn send_chat(
        &self,
        room: &RoomId,
        participant: &Participant,
        draft: ChatDraft,
    ) -> RoomResult<Option<ChatMessage>> {
        let Some(contract) = self.contract_for(room, participant).await else {
            warn!(%room, user = %participant.user, "chat for unresolved room dropped");
            return Ok(None);
        };

        let message = draft.into_message(
            contract,
            participant.session.clone(),
            &participant.user,
            participant.role,
        );
        if message.message_type == ChatMessageType::Chat && message.content.trim().is_empty() {
            debug!(%room, "blank chat line ignored");
            return Ok(None);
        }
        if matches!(
            message.message_type,
            ChatMessageType::End | ChatMessageType::System
        ) {
            return Err(RoomError::InvalidEvent(format!(
                "{} lines are written by the server",
                message.message_type.as_str()
            )));
        }

        if message.message_type.is_queued() {
            self.chat.enqueue(&message).await?;
        }
        self.broker.publish(
            room,
            SyncEvent::Chat {
                message: message.clone(),
            },
        );

        if let Some(session) = &participant.session {
            if let Err(err) = self.mapper.update_last_access(session).await {
                warn!(%session, error = %err, "mapping access not refreshed");
            }
        }
        Ok(Some(message))
    }

    /// Announce a participant in the room's chat.
    ///
    /// # Errors
    /// Returns an error if the JOIN line cannot be queued.
    pub async fn announce_join(
        &self,
        room: &RoomId,
        participant: &Participant,
    ) -> RoomResult<Option<ChatMessage>> {
        let name = participant.role.display_name();
        let draft = ChatDraft {
            sender_name: Some(name.to_string()),
            content: format!("{name} joined."),
            message_type: Some(ChatMessageType::Join),
            ..ChatDraft::default()
        };
        self.send_chat(room, participant, draft).await
    }

    /// Refresh a session's mapping activity.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn heartbeat(&self, session: &SessionId) -> RoomResult<bool> {
        self.mapper.update_last_access(session).await
    }

    /// End a consultation: finalize its chat and announce the end.
    ///
    /// # Errors
    /// Returns an error if the finalize pipeline fails before recording the
    /// END line.
    pub async fn end_consultation(
        &self,
        contract: ContractId,
        terminating_user: &str,
        memo: Option<String>,
    ) -> RoomResult<FinalizeOutcome> {
        self.finalizer
            .finalize(contract, terminating_user, memo)
            .await
    }

    /// Presence with the latest agent session hint.
    #[must_use]
    pub fn presence_status(&self, room: &RoomId) -> PresenceStatus {
        let snapshot = self.presence.snapshot(room);
        PresenceStatus {
            present: snapshot.present,
            active_count: snapshot.active_count,
            session_id: self.presence.latest_session(room),
        }
    }

    /// Push-style presence update.
    pub fn update_presence(
        &self,
        room: &RoomId,
        present: bool,
        session: Option<SessionId>,
    ) -> PresenceSnapshot {
        self.presence.update(room, present, session)
    }

    /// Force a room's presence back to absent.
    pub fn reset_presence(&self, room: &RoomId) -> PresenceSnapshot {
        self.presence.reset(room)
    }

    /// Durable chat history of a consultation.
    ///
    /// # Errors
    /// Returns an error if the durable store cannot be read.
    pub async fn chat_history(&self, contract: ContractId) -> RoomResult<Vec<ChatMessage>> {
        self.durable.find_chat_history(contract).await
    }

    /// Latest export artifact path of a consultation.
    ///
    /// # Errors
    /// Returns an error if the durable store cannot be read.
    pub async fn export_path(&self, contract: ContractId) -> RoomResult<Option<String>> {
        self.durable.latest_export_path(contract).await
    }

    /// Consultations whose chat queue was never finalized.
    ///
    /// # Errors
    /// Returns an error if the shared store cannot be read.
    pub async fn pending_chat_rooms(&self) -> RoomResult<Vec<ContractId>> {
        self.chat.pending_rooms().await
    }

    async fn contract_for(&self, room: &RoomId, participant: &Participant) -> Option<ContractId> {
        if let Some(contract) = room.contract_id() {
            return Some(contract);
        }
        if let RoomId::Session(session) = room {
            if let Some(contract) = self.mapper.get_contract_id(session).await {
                return Some(contract);
            }
        }
        match &participant.session {
            Some(session) => self.mapper.get_contract_id(session).await,
            None => None,
        }
    }
}
