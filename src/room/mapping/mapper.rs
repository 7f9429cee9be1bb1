//! Bidirectional session ⇄ consultation mapping over the shared store.
//!
//! Forward records live under `session:mapping:<sessionId>` as JSON, reverse
//! records under `contract:session:<contractId>` as the bare session id. Both
//! carry the same TTL. Writes are two independent round trips, so readers of
//! the reverse direction confirm the forward record before trusting it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::room::core::config::MappingConfig;
use crate::room::core::errors::{RoomError, RoomResult};
use crate::room::core::ids::{ContractId, SessionId};
use crate::room::core::role::Role;
use crate::room::store::shared_store::SharedStore;

const FORWARD_PREFIX: &str = "session:mapping:";
const REVERSE_PREFIX: &str = "contract:session:";

/// Stored forward mapping record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMapping {
    /// Transport session.
    pub session_id: SessionId,
    /// Consultation the session belongs to.
    pub contract_id: ContractId,
    /// Role declared when the mapping was created.
    pub role: Role,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time after which the store drops the record.
    pub expires_at: DateTime<Utc>,
    /// Last chat or heartbeat activity.
    pub last_access_at: DateTime<Utc>,
}

fn forward_key(session: &SessionId) -> String {
    format!("{FORWARD_PREFIX}{session}")
}

fn reverse_key(contract: ContractId) -> String {
    format!("{REVERSE_PREFIX}{contract}")
}

/// Session-contract mapper.
pub struct SessionContractMapper {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
    session_pattern: Regex,
}

impl SessionContractMapper {
    /// Create a mapper over a shared store.
    ///
    /// # Errors
    /// Returns an error if the session id pattern does not compile or the TTL
    /// is out of range.
    pub fn new(store: Arc<dyn SharedStore>, config: &MappingConfig) -> RoomResult<Self> {
        let seconds = config.ttl_hours.checked_mul(3600).ok_or_else(|| {
            RoomError::InvalidConfig("mapping.ttl_hours is too large".to_string())
        })?;
        Ok(Self {
            store,
            ttl: Duration::from_secs(seconds),
            session_pattern: Regex::new(&config.session_id_pattern)?,
        })
    }

    /// Lifetime given to new mappings.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check that a session id has the accepted shape.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidIdentifier`] for malformed ids.
    pub fn validate_session(&self, session: &SessionId) -> RoomResult<()> {
        if self.session_pattern.is_match(session.as_str()) {
            Ok(())
        } else {
            Err(RoomError::InvalidIdentifier(format!(
                "session id {session:?} is malformed"
            )))
        }
    }

    /// Record that `session` belongs to `contract`, in both directions.
    ///
    /// A later mapping for the same contract replaces the reverse record.
    ///
    /// # Errors
    /// Returns an error if the session id is malformed or either write fails.
    pub async fn create_mapping(
        &self,
        session: &SessionId,
        contract: ContractId,
        role: Role,
    ) -> RoomResult<SessionMapping> {
        self.validate_session(session)?;

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| RoomError::InvalidConfig("mapping TTL overflows".to_string()))?;
        let mapping = SessionMapping {
            session_id: session.clone(),
            contract_id: contract,
            role,
            created_at: now,
            expires_at,
            last_access_at: now,
        };

        let payload = serde_json::to_string(&mapping)?;
        self.store
            .set(&forward_key(session), payload, Some(self.ttl))
            .await?;
        self.store
            .set(
                &reverse_key(contract),
                session.as_str().to_string(),
                Some(self.ttl),
            )
            .await?;

        info!(%session, %contract, %role, "session mapped to consultation");
        Ok(mapping)
    }

    /// Forward record for a session; store errors read as absent.
    pub async fn get_mapping(&self, session: &SessionId) -> Option<SessionMapping> {
        match self.load_mapping(session).await {
            Ok(mapping) => mapping,
            Err(err) => {
                warn!(%session, error = %err, "mapping lookup failed, treating as absent");
                None
            }
        }
    }

    /// Consultation a session belongs to.
    pub async fn get_contract_id(&self, session: &SessionId) -> Option<ContractId> {
        self.get_mapping(session)
            .await
            .map(|mapping| mapping.contract_id)
    }

    /// Live session of a consultation.
    ///
    /// A reverse record whose forward record is gone or points at another
    /// consultation reads as absent.
    pub async fn get_session_id(&self, contract: ContractId) -> Option<SessionId> {
        let raw = match self.store.get(&reverse_key(contract)).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(%contract, error = %err, "reverse mapping lookup failed, treating as absent");
                return None;
            }
        };
        let session = SessionId::new(raw);
        match self.get_contract_id(&session).await {
            Some(found) if found == contract => Some(session),
            other => {
                debug!(%contract, %session, forward = ?other, "stale reverse mapping ignored");
                None
            }
        }
    }

    /// Whether `session` currently maps to `contract`.
    pub async fn is_valid_mapping(&self, session: &SessionId, contract: ContractId) -> bool {
        self.get_contract_id(session).await == Some(contract)
    }

    /// Refresh `lastAccessAt`, keeping the record's remaining lifetime.
    ///
    /// Returns `false` when there is no live mapping to refresh.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn update_last_access(&self, session: &SessionId) -> RoomResult<bool> {
        let key = forward_key(session);
        let Some(mut mapping) = self.load_mapping(session).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let remaining = match self.store.ttl(&key).await? {
            Some(remaining) => remaining,
            None => (mapping.expires_at - now).to_std().unwrap_or_default(),
        };
        if remaining.is_zero() {
            return Ok(false);
        }

        mapping.last_access_at = now;
        let payload = serde_json::to_string(&mapping)?;
        self.store.set(&key, payload, Some(remaining)).await?;
        debug!(%session, "mapping access refreshed");
        Ok(true)
    }

    /// Delete a session's mapping, and the reverse record if it still points
    /// at this session.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn remove_mapping(&self, session: &SessionId) -> RoomResult<bool> {
        let mapping = self.load_mapping(session).await?;
        let removed = self.store.delete(&forward_key(session)).await?;

        if let Some(mapping) = mapping {
            let reverse = reverse_key(mapping.contract_id);
            if self.store.get(&reverse).await?.as_deref() == Some(session.as_str()) {
                self.store.delete(&reverse).await?;
            }
            info!(%session, contract = %mapping.contract_id, "session mapping removed");
        }
        Ok(removed)
    }

    async fn load_mapping(&self, session: &SessionId) -> RoomResult<Option<SessionMapping>> {
        let Some(raw) = self.store.get(&forward_key(session)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(mapping) => Ok(Some(mapping)),
            Err(err) => {
                warn!(%session, error = %err, "unreadable mapping record ignored");
                Ok(None)
            }
        }
    }
}
