//! Entry gate: clients may only enter a room while an agent is present.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::room::core::config::GateConfig;
use crate::room::core::ids::{ContractId, RoomId, SessionId};
use crate::room::core::role::Role;
use crate::room::presence::tracker::{PresenceArena, PresenceSnapshot};

/// Outcome of an entry attempt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Caller may enter the room.
    Admit {
        /// Role the caller entered with.
        role: Role,
        /// Presence after admission.
        presence: PresenceSnapshot,
    },
    /// Caller must wait elsewhere.
    Redirect {
        /// Waiting room location.
        location: String,
    },
}

impl GateDecision {
    /// Whether the caller was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }
}

/// Pre-handler deciding who may enter a room.
#[derive(Debug, Clone)]
pub struct EntryGate {
    presence: Arc<PresenceArena>,
    waiting_room_path: String,
}

impl EntryGate {
    /// Create a gate over the shared presence arena.
    #[must_use]
    pub fn new(presence: Arc<PresenceArena>, config: &GateConfig) -> Self {
        Self {
            presence,
            waiting_room_path: config.waiting_room_path.clone(),
        }
    }

    /// Decide whether an anonymous caller may enter `room`.
    ///
    /// Agents are always admitted and counted as present. Everyone else is
    /// admitted only while an agent is present; otherwise they are sent to the
    /// waiting room, which receives `contract` when it is known.
    pub fn admit(
        &self,
        room: &RoomId,
        role: Role,
        contract: Option<ContractId>,
    ) -> GateDecision {
        self.admit_session(room, role, contract, None)
    }

    /// Like [`EntryGate::admit`], counting an agent under `session` so that
    /// later updates for the same session do not count it again.
    pub fn admit_session(
        &self,
        room: &RoomId,
        role: Role,
        contract: Option<ContractId>,
        session: Option<&SessionId>,
    ) -> GateDecision {
        match role {
            Role::Agent => {
                let presence = self.presence.update(room, true, session.cloned());
                GateDecision::Admit { role, presence }
            }
            Role::Client => {
                if self.presence.is_present(room) {
                    debug!(%room, "client admitted");
                    GateDecision::Admit {
                        role,
                        presence: self.presence.snapshot(room),
                    }
                } else {
                    let location = self.waiting_room_url(contract.or_else(|| room.contract_id()));
                    info!(%room, %location, "no agent present, client sent to waiting room");
                    GateDecision::Redirect { location }
                }
            }
        }
    }

    /// Waiting room location, optionally carrying the target contract.
    #[must_use]
    pub fn waiting_room_url(&self, contract: Option<ContractId>) -> String {
        match contract {
            Some(contract) => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("contractId", &contract.to_string())
                    .finish();
                format!("{}?{query}", self.waiting_room_path)
            }
            None => self.waiting_room_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> (EntryGate, Arc<PresenceArena>) {
        let arena = Arc::new(PresenceArena::new());
        (EntryGate::new(Arc::clone(&arena), &GateConfig::default()), arena)
    }

    #[test]
    fn test_client_redirected_without_agent() {
        let (gate, _) = gate();
        let room = RoomId::Contract(ContractId(55));
        let decision = gate.admit(&room, Role::Client, None);
        assert_eq!(
            decision,
            GateDecision::Redirect {
                location: "/waiting-room?contractId=55".to_string()
            }
        );
    }

    #[test]
    fn test_agent_opens_room_for_client() {
        let (gate, arena) = gate();
        let room = RoomId::Contract(ContractId(9));
        assert!(gate.admit(&room, Role::Agent, None).is_admitted());
        assert_eq!(arena.snapshot(&room).active_count, 1);
        assert!(gate.admit(&room, Role::Client, None).is_admitted());
        assert_eq!(arena.snapshot(&room).active_count, 1);
    }

    #[test]
    fn test_waiting_room_without_contract() {
        let (gate, _) = gate();
        let room = RoomId::from_segment("pending-session");
        let decision = gate.admit(&room, Role::Client, None);
        assert_eq!(
            decision,
            GateDecision::Redirect {
                location: "/waiting-room".to_string()
            }
        );
    }
}
