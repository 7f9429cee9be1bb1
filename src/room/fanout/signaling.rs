//! WebRTC signaling relay with per-room participant counts.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::room::core::ids::RoomId;
use crate::room::fanout::broker::RoomBroker;
use crate::room::fanout::events::{SyncEvent, WebRtcSignal};

/// Signaling participants per room. Rooms at zero have no entry.
#[derive(Debug, Default)]
pub struct ParticipantCounter {
    counts: DashMap<RoomId, u32>,
}

impl ParticipantCounter {
    /// Create an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a join and return the new total.
    pub fn join(&self, room: &RoomId) -> u32 {
        let mut count = self.counts.entry(room.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Count a leave and return the new total, removing the room at zero.
    pub fn leave(&self, room: &RoomId) -> u32 {
        match self.counts.entry(room.clone()) {
            Entry::Occupied(mut occupied) => {
                let remaining = occupied.get().saturating_sub(1);
                if remaining == 0 {
                    occupied.remove();
                } else {
                    *occupied.get_mut() = remaining;
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    /// Current participants of a room.
    #[must_use]
    pub fn count(&self, room: &RoomId) -> u32 {
        self.counts.get(room).map_or(0, |count| *count)
    }

    /// Whether the room has a counter entry.
    #[must_use]
    pub fn is_tracked(&self, room: &RoomId) -> bool {
        self.counts.contains_key(room)
    }
}

/// Applies join/leave bookkeeping and relays signals through the broker.
#[derive(Debug)]
pub struct SignalRelay {
    broker: Arc<RoomBroker>,
    participants: ParticipantCounter,
}

impl SignalRelay {
    /// Create a relay publishing through `broker`.
    #[must_use]
    pub fn new(broker: Arc<RoomBroker>) -> Self {
        Self {
            broker,
            participants: ParticipantCounter::new(),
        }
    }

    /// Participant counter.
    #[must_use]
    pub const fn participants(&self) -> &ParticipantCounter {
        &self.participants
    }

    /// Relay a signal to the room.
    ///
    /// Joins are stamped with the new participant count and the server time;
    /// leaves decrement the count. Everything else is forwarded as is.
    /// Returns the signal as published.
    pub fn relay(&self, room: &RoomId, signal: WebRtcSignal) -> WebRtcSignal {
        let signal = match signal {
            WebRtcSignal::Join { sender, .. } => {
                let participants = self.participants.join(room);
                info!(%room, participants, "peer joined call");
                WebRtcSignal::Join {
                    sender,
                    participants: Some(participants),
                    timestamp: Some(Utc::now().timestamp_millis()),
                }
            }
            WebRtcSignal::Leave { sender } => {
                let participants = self.participants.leave(room);
                info!(%room, participants, "peer left call");
                WebRtcSignal::Leave { sender }
            }
            other => other,
        };
        self.broker.publish(
            room,
            SyncEvent::Rtc {
                signal: signal.clone(),
            },
        );
        signal
    }

    /// Count a peer as gone without a leave signal, such as on disconnect.
    pub fn drop_participant(&self, room: &RoomId) -> u32 {
        self.participants.leave(room)
    }
}
