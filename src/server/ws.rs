//! WebSocket transport for room subscribers.
//!
//! Each connection subscribes to one room. Outbound traffic is the room's
//! fan-out plus replies to this connection's own frames; inbound frames are
//! tagged by `op`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::room::chat::message::ChatDraft;
use crate::room::coordinator::Participant;
use crate::room::core::errors::RoomResult;
use crate::room::core::ids::{RoomId, SessionId};
use crate::room::core::role::Role;
use crate::room::fanout::events::{SyncEvent, WebRtcSignal};
use crate::room::presence::gate::GateDecision;

use super::routes::ParticipantQuery;
use super::state::AppState;

const REPLY_BUFFER: usize = 32;

/// Frame sent by a connected participant.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Synchronization event to fan out.
    Publish {
        /// Event in its wire form.
        event: Value,
    },
    /// WebRTC signal to relay.
    Rtc {
        /// Signal in its wire form.
        signal: Value,
    },
    /// Chat line.
    Chat {
        /// Line as drafted by the client.
        message: ChatDraft,
    },
    /// Keeps the session mapping alive.
    Heartbeat,
}

/// Reply addressed to one connection only.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Reply {
    /// The frame was rejected.
    Error {
        /// Reason.
        message: String,
    },
    /// Heartbeat acknowledgement.
    Heartbeat {
        /// Whether the session mapping is still live.
        mapped: bool,
    },
}

/// Per-connection state the transport must release on disconnect.
#[derive(Debug, Default)]
pub struct Connection {
    open_signal_joins: u32,
}

/// Upgrade a room subscription. Clients are gated before the upgrade.
pub async fn ws_room(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Query(query): Query<ParticipantQuery>,
) -> Response {
    let room = state.coordinator.resolve_room(&room).await;
    let mut participant = query.participant();
    participant.session.get_or_insert_with(SessionId::generate);
    if participant.role == Role::Client {
        if let GateDecision::Redirect { location } =
            state
                .coordinator
                .enter(&room, Role::Client, query.contract_id)
        {
            return Redirect::to(&location).into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, room, participant))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    room: RoomId,
    participant: Participant,
) {
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Reply>(REPLY_BUFFER);
    let mut subscription = state.coordinator.subscribe(&room);
    info!(%room, user = %participant.user, role = %participant.role, "room connection opened");

    let send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                frame = subscription.recv() => match frame {
                    Some(frame) => serde_json::to_string(frame.as_ref()),
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => serde_json::to_string(&reply),
                    None => break,
                },
            };
            let text = match text {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "outbound frame not serializable");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    attach(&state, &room, &participant).await;

    let mut connection = Connection::default();
    while let Some(message) = receiver.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(%room, error = %err, "room connection read failed");
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = match handle_frame(&state, &room, &participant, &mut connection, text.as_str())
            .await
        {
            Ok(reply) => reply,
            Err(err) => Some(Reply::Error {
                message: err.to_string(),
            }),
        };
        if let Some(reply) = reply {
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    }

    send_task.abort();
    release(&state, &room, &participant, connection).await;
}

/// Apply one inbound frame.
///
/// # Errors
/// Returns an error if the frame is malformed or rejected by the room.
pub async fn handle_frame(
    state: &AppState,
    room: &RoomId,
    participant: &Participant,
    connection: &mut Connection,
    text: &str,
) -> RoomResult<Option<Reply>> {
    match serde_json::from_str::<InboundFrame>(text)? {
        InboundFrame::Publish { event } => {
            state
                .coordinator
                .publish(room, SyncEvent::from_value(event)?)?;
            Ok(None)
        }
        InboundFrame::Rtc { signal } => {
            let signal: WebRtcSignal = serde_json::from_value(signal)?;
            let relayed = state.coordinator.relay_signal(room, signal)?;
            match relayed {
                WebRtcSignal::Join { .. } => connection.open_signal_joins += 1,
                WebRtcSignal::Leave { .. } => {
                    connection.open_signal_joins = connection.open_signal_joins.saturating_sub(1);
                }
                _ => {}
            }
            Ok(None)
        }
        InboundFrame::Chat { message } => {
            state.coordinator.send_chat(room, participant, message).await?;
            Ok(None)
        }
        InboundFrame::Heartbeat => {
            let mapped = match &participant.session {
                Some(session) => state.coordinator.heartbeat(session).await?,
                None => false,
            };
            Ok(Some(Reply::Heartbeat { mapped }))
        }
    }
}

/// Register a freshly opened connection with its room.
pub async fn attach(state: &AppState, room: &RoomId, participant: &Participant) {
    if let Err(err) = state.coordinator.connect(room, participant).await {
        warn!(%room, error = %err, "join line not recorded");
    }
}

/// Release everything a closed connection still holds.
pub async fn release(
    state: &AppState,
    room: &RoomId,
    participant: &Participant,
    connection: Connection,
) {
    for _ in 0..connection.open_signal_joins {
        state.coordinator.drop_signal_participant(room);
    }
    state.coordinator.leave(room, participant).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::core::config::RoomConfig;
    use crate::room::core::errors::RoomError;
    use crate::room::coordinator::JoinRequest;
    use crate::room::core::ids::ContractId;

    async fn state() -> RoomResult<(Arc<AppState>, tempfile::TempDir)> {
        let temp = tempfile::tempdir()?;
        let mut config = RoomConfig::default();
        config.chat.export_dir = temp.path().join("chat");
        Ok((AppState::in_memory(config).await?, temp))
    }

    fn agent() -> Participant {
        Participant {
            user: "agent-1".to_string(),
            role: Role::Agent,
            session: Some(SessionId::new("a-1")),
        }
    }

    #[tokio::test]
    async fn test_publish_frame_reaches_subscribers() -> RoomResult<()> {
        let (state, _temp) = state().await?;
        let room = RoomId::Contract(ContractId(4));
        let mut subscription = state.coordinator.subscribe(&room);
        let mut connection = Connection::default();

        let reply = handle_frame(
            &state,
            &room,
            &agent(),
            &mut connection,
            r#"{"op":"publish","event":{"kind":"page","page":3}}"#,
        )
        .await?;
        assert_eq!(reply, None);
        let frame = subscription.recv().await;
        assert_eq!(frame.map(|frame| frame.event.kind()), Some("page"));
        Ok(())
    }

    #[tokio::test]
    async fn test_end_cannot_be_published_by_participant() -> RoomResult<()> {
        let (state, _temp) = state().await?;
        let room = RoomId::Contract(ContractId(4));
        let result = handle_frame(
            &state,
            &room,
            &agent(),
            &mut Connection::default(),
            r#"{"op":"publish","event":{"kind":"end","contract_id":4,"redirect_url":"/"}}"#,
        )
        .await;
        assert!(matches!(result, Err(RoomError::InvalidEvent(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_op_is_rejected() -> RoomResult<()> {
        let (state, _temp) = state().await?;
        let room = RoomId::Contract(ContractId(4));
        let result = handle_frame(
            &state,
            &room,
            &agent(),
            &mut Connection::default(),
            r#"{"op":"teleport"}"#,
        )
        .await;
        assert!(matches!(result, Err(RoomError::Serialization(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_release_drops_unbalanced_signal_joins() -> RoomResult<()> {
        let (state, _temp) = state().await?;
        let room = RoomId::Contract(ContractId(8));
        let mut connection = Connection::default();
        for _ in 0..2 {
            handle_frame(
                &state,
                &room,
                &agent(),
                &mut connection,
                r#"{"op":"rtc","signal":{"type":"join"}}"#,
            )
            .await?;
        }
        handle_frame(
            &state,
            &room,
            &agent(),
            &mut connection,
            r#"{"op":"rtc","signal":{"type":"leave"}}"#,
        )
        .await?;
        assert_eq!(state.coordinator.signal_participants(&room), 1);

        release(&state, &room, &agent(), connection).await;
        assert_eq!(state.coordinator.signal_participants(&room), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_reports_mapping() -> RoomResult<()> {
        let (state, _temp) = state().await?;
        let room = RoomId::Contract(ContractId(6));
        let participant = agent();
        let reply = handle_frame(
            &state,
            &room,
            &participant,
            &mut Connection::default(),
            r#"{"op":"heartbeat"}"#,
        )
        .await?;
        assert_eq!(reply, Some(Reply::Heartbeat { mapped: false }));
        Ok(())
    }

    #[tokio::test]
    async fn test_agent_socket_lifecycle_restores_presence() -> RoomResult<()> {
        let (state, _temp) = state().await?;
        let room = RoomId::Contract(ContractId(12));

        attach(&state, &room, &agent()).await;
        assert_eq!(state.coordinator.presence_status(&room).active_count, 1);
        release(&state, &room, &agent(), Connection::default()).await;
        assert_eq!(state.coordinator.presence_status(&room).active_count, 0);

        state
            .coordinator
            .join(JoinRequest {
                session_id: SessionId::new("a-1"),
                contract_id: ContractId(12),
                role: Some("agent".to_string()),
            })
            .await?;
        attach(&state, &room, &agent()).await;
        assert_eq!(state.coordinator.presence_status(&room).active_count, 1);
        release(&state, &room, &agent(), Connection::default()).await;
        let status = state.coordinator.presence_status(&room);
        assert_eq!(status.active_count, 0);
        assert!(!status.present);
        Ok(())
    }

    #[tokio::test]
    async fn test_two_agent_sockets_need_two_closes() -> RoomResult<()> {
        let (state, _temp) = state().await?;
        let room = RoomId::Contract(ContractId(13));
        let second = Participant {
            session: Some(SessionId::generate()),
            ..agent()
        };
        attach(&state, &room, &agent()).await;
        attach(&state, &room, &second).await;
        release(&state, &room, &agent(), Connection::default()).await;
        assert!(state.coordinator.presence_status(&room).present);
        release(&state, &room, &second, Connection::default()).await;
        assert!(!state.coordinator.presence_status(&room).present);
        Ok(())
    }
}
