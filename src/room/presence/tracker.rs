//! Per-room agent presence counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::room::core::ids::{RoomId, SessionId};

/// Point-in-time view of a room's presence.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Whether at least one agent is in the room.
    pub present: bool,
    /// Number of agent joins not yet matched by a leave.
    pub active_count: u32,
}

impl PresenceSnapshot {
    const fn from_count(active_count: u32) -> Self {
        Self {
            present: active_count > 0,
            active_count,
        }
    }
}

/// Reference-counted "agent present" flag for one room.
///
/// The flag is derived from the counter, so it can never disagree with it.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    active: AtomicU32,
    sessions: DashMap<SessionId, DateTime<Utc>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an agent join (`true`) or leave (`false`).
    ///
    /// Leaves are floor-clamped at zero. Returns the resulting state.
    pub fn set_present(&self, present: bool) -> PresenceSnapshot {
        let count = if present {
            self.active.fetch_add(1, Ordering::AcqRel).saturating_add(1)
        } else {
            let previous = self
                .active
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                    Some(count.saturating_sub(1))
                })
                .unwrap_or_else(|count| count);
            previous.saturating_sub(1)
        };
        PresenceSnapshot::from_count(count)
    }

    /// Whether at least one agent is present.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.active_count() > 0
    }

    /// Current agent count.
    #[must_use]
    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }

    /// Consistent view of flag and counter.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot::from_count(self.active_count())
    }

    /// Record a join or leave attributed to an agent session.
    ///
    /// Each session is counted once: joining again with an announced session
    /// only refreshes its hint. Leaving with an unknown session releases an
    /// anonymous join if one is outstanding and is otherwise ignored.
    /// Callers must serialize updates for one room.
    pub fn set_session_present(&self, session: SessionId, present: bool) -> PresenceSnapshot {
        if present {
            if self.sessions.insert(session, Utc::now()).is_none() {
                self.set_present(true)
            } else {
                self.snapshot()
            }
        } else if self.sessions.remove(&session).is_some() {
            self.set_present(false)
        } else if self.anonymous_count() > 0 {
            self.set_present(false)
        } else {
            self.snapshot()
        }
    }

    /// Whether a session is currently counted.
    #[must_use]
    pub fn has_session(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    fn anonymous_count(&self) -> u32 {
        let sessions = u32::try_from(self.sessions.len()).unwrap_or(u32::MAX);
        self.active_count().saturating_sub(sessions)
    }

    /// Most recently announced active session, if any.
    #[must_use]
    pub fn latest_session(&self) -> Option<SessionId> {
        self.sessions
            .iter()
            .max_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone())
    }

    /// Force the tracker back to its initial empty state.
    pub fn reset(&self) {
        self.active.store(0, Ordering::Release);
        self.sessions.clear();
    }

    fn is_idle(&self) -> bool {
        self.active_count() == 0 && self.sessions.is_empty()
    }
}

/// Arena of presence trackers keyed by room.
#[derive(Debug, Default)]
pub struct PresenceArena {
    rooms: DashMap<RoomId, Arc<PresenceTracker>>,
}

impl PresenceArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on a room's tracker, created on first use.
    ///
    /// The room's shard stays locked while `f` runs, so pruning cannot
    /// remove the tracker under an in-flight update.
    fn with_tracker<R>(&self, room: &RoomId, f: impl FnOnce(&PresenceTracker) -> R) -> R {
        let entry = self.rooms.entry(room.clone()).or_default();
        f(entry.value())
    }

    /// Record an anonymous agent join or leave for a room.
    pub fn set_present(&self, room: &RoomId, present: bool) -> PresenceSnapshot {
        let snapshot = self.with_tracker(room, |tracker| tracker.set_present(present));
        log_transition(room, present, snapshot);
        snapshot
    }

    /// Push-style presence update carrying an optional session hint.
    ///
    /// With a session the update is idempotent per session, see
    /// [`PresenceTracker::set_session_present`].
    pub fn update(
        &self,
        room: &RoomId,
        present: bool,
        session: Option<SessionId>,
    ) -> PresenceSnapshot {
        let snapshot = self.with_tracker(room, |tracker| match session {
            Some(session) => tracker.set_session_present(session, present),
            None => tracker.set_present(present),
        });
        log_transition(room, present, snapshot);
        snapshot
    }

    /// Whether a session is counted in a room.
    #[must_use]
    pub fn has_session(&self, room: &RoomId, session: &SessionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|tracker| tracker.has_session(session))
    }

    /// Whether an agent is present, without allocating a tracker.
    #[must_use]
    pub fn is_present(&self, room: &RoomId) -> bool {
        let present = self
            .rooms
            .get(room)
            .is_some_and(|tracker| tracker.is_present());
        debug!(%room, present, "presence checked");
        present
    }

    /// Presence snapshot for a room.
    #[must_use]
    pub fn snapshot(&self, room: &RoomId) -> PresenceSnapshot {
        self.rooms
            .get(room)
            .map(|tracker| tracker.snapshot())
            .unwrap_or_default()
    }

    /// Most recently announced active session for a room.
    #[must_use]
    pub fn latest_session(&self, room: &RoomId) -> Option<SessionId> {
        self.rooms
            .get(room)
            .and_then(|tracker| tracker.latest_session())
    }

    /// Reset a room to `{present: false, activeCount: 0}`.
    pub fn reset(&self, room: &RoomId) -> PresenceSnapshot {
        if let Some(tracker) = self.rooms.get(room) {
            tracker.reset();
        }
        info!(%room, "presence reset");
        PresenceSnapshot::default()
    }

    /// Drop trackers that hold no agents and no session hints.
    ///
    /// Returns the number of rooms removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.rooms.len();
        self.rooms
            .retain(|_, tracker| Arc::strong_count(tracker) > 1 || !tracker.is_idle());
        before.saturating_sub(self.rooms.len())
    }

    /// Number of rooms currently tracked.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

fn log_transition(room: &RoomId, present: bool, snapshot: PresenceSnapshot) {
    if present {
        info!(%room, active = snapshot.active_count, "agent entered room");
    } else if snapshot.present {
        info!(%room, active = snapshot.active_count, "agent left room, others remain");
    } else {
        info!(%room, "last agent left room");
    }
}
