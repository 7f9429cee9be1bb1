//! Per-room publish/subscribe.
//!
//! Each room owns a bounded `broadcast` channel. Publishing never waits:
//! subscribers that fall more than the channel capacity behind skip the
//! missed frames and carry on. Nothing is replayed to late subscribers.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::room::core::config::FanoutConfig;
use crate::room::core::ids::RoomId;
use crate::room::fanout::events::{OutboundFrame, SyncEvent};

/// Shared frame handed to every subscriber.
pub type SharedFrame = Arc<OutboundFrame>;

/// Room-scoped event broker.
#[derive(Debug)]
pub struct RoomBroker {
    channels: DashMap<RoomId, broadcast::Sender<SharedFrame>>,
    capacity: usize,
}

impl RoomBroker {
    /// Create a broker whose room channels buffer `channel_capacity` frames.
    #[must_use]
    pub fn new(config: &FanoutConfig) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: config.channel_capacity.max(1),
        }
    }

    /// Deliver an event to everyone currently subscribed to `room`.
    ///
    /// Returns the number of subscribers the frame was queued for.
    pub fn publish(&self, room: &RoomId, event: SyncEvent) -> usize {
        let kind = event.kind();
        let Some(sender) = self.channels.get(room).map(|entry| entry.value().clone()) else {
            debug!(%room, kind, "no subscribers, event dropped");
            return 0;
        };
        let frame = Arc::new(OutboundFrame::new(room.clone(), event));
        match sender.send(frame) {
            Ok(receivers) => {
                debug!(%room, kind, receivers, "event published");
                receivers
            }
            Err(_) => {
                debug!(%room, kind, "subscribers gone, event dropped");
                0
            }
        }
    }

    /// Subscribe to a room for as long as the subscription is held.
    #[must_use]
    pub fn subscribe(&self, room: &RoomId) -> RoomSubscription {
        let receiver = self
            .channels
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(%room, "subscriber attached");
        RoomSubscription {
            room: room.clone(),
            receiver,
        }
    }

    /// Current number of subscribers of a room.
    #[must_use]
    pub fn subscriber_count(&self, room: &RoomId) -> usize {
        self.channels
            .get(room)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Drop channels with no subscribers left. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let before = self.channels.len();
        self.channels
            .retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    /// Number of rooms with a live channel.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.channels.len()
    }
}

/// Live subscription to one room. Dropping it unsubscribes.
#[derive(Debug)]
pub struct RoomSubscription {
    room: RoomId,
    receiver: broadcast::Receiver<SharedFrame>,
}

impl RoomSubscription {
    /// Room this subscription listens to.
    #[must_use]
    pub const fn room(&self) -> &RoomId {
        &self.room
    }

    /// Next frame, skipping over frames lost to lag.
    ///
    /// Returns `None` once the room channel is gone.
    pub async fn recv(&mut self) -> Option<SharedFrame> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) => return Some(frame),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(room = %self.room, skipped, "slow subscriber lost events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
