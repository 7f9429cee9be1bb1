//! Background sweeper for ephemeral room state.
//!
//! Periodically purges expired keys from the in-process shared store and
//! drops idle presence trackers and fan-out channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::room::core::config::SweepConfig;
use crate::room::fanout::broker::RoomBroker;
use crate::room::presence::tracker::PresenceArena;
use crate::room::store::memory_store::InMemorySharedStore;

/// Statistics from a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired shared store keys removed.
    pub expired_keys: usize,
    /// Presence trackers dropped.
    pub idle_presence_rooms: usize,
    /// Fan-out channels dropped.
    pub idle_channels: usize,
    /// Sweep duration in milliseconds.
    pub duration_ms: u64,
}

impl SweepStats {
    const fn removed_anything(&self) -> bool {
        self.expired_keys > 0 || self.idle_presence_rooms > 0 || self.idle_channels > 0
    }
}

/// Background sweeper.
pub struct StoreSweeper {
    store: Arc<InMemorySharedStore>,
    presence: Arc<PresenceArena>,
    broker: Arc<RoomBroker>,
    config: SweepConfig,
    shutdown: Arc<Notify>,
}

impl StoreSweeper {
    /// Create a sweeper.
    #[must_use]
    pub fn new(
        store: Arc<InMemorySharedStore>,
        presence: Arc<PresenceArena>,
        broker: Arc<RoomBroker>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            presence,
            broker,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notifier that stops the sweeper when signaled with `notify_one`.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the sweeper as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("store sweeper is disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(?interval, "starting store sweeper");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    let stats = self.sweep();
                    if stats.removed_anything() {
                        info!(
                            expired_keys = stats.expired_keys,
                            idle_presence_rooms = stats.idle_presence_rooms,
                            idle_channels = stats.idle_channels,
                            duration_ms = stats.duration_ms,
                            "sweep completed"
                        );
                    } else {
                        debug!("sweep completed with nothing to remove");
                    }
                }
                () = self.shutdown.notified() => {
                    info!("store sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single sweep.
    pub fn sweep(&self) -> SweepStats {
        let start = std::time::Instant::now();
        let mut stats = SweepStats {
            expired_keys: self.store.purge_expired(),
            idle_presence_rooms: self.presence.prune_idle(),
            idle_channels: self.broker.prune_idle(),
            duration_ms: 0,
        };
        stats.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::core::config::FanoutConfig;
    use crate::room::core::ids::{ContractId, RoomId};
    use crate::room::store::shared_store::SharedStore;

    fn sweeper(config: SweepConfig) -> (StoreSweeper, Arc<InMemorySharedStore>, Arc<PresenceArena>) {
        let store = Arc::new(InMemorySharedStore::new());
        let presence = Arc::new(PresenceArena::new());
        let broker = Arc::new(RoomBroker::new(&FanoutConfig::default()));
        (
            StoreSweeper::new(Arc::clone(&store), Arc::clone(&presence), broker, config),
            store,
            presence,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_and_idle() -> crate::room::core::errors::RoomResult<()> {
        let (sweeper, store, presence) = sweeper(SweepConfig::default());
        store
            .set("session:mapping:s", "{}".to_string(), Some(Duration::from_secs(5)))
            .await?;
        let room = RoomId::Contract(ContractId(1));
        presence.set_present(&room, true);
        presence.set_present(&room, false);

        tokio::time::advance(Duration::from_secs(6)).await;
        let stats = sweeper.sweep();
        assert_eq!(stats.expired_keys, 1);
        assert_eq!(stats.idle_presence_rooms, 1);
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_sweeper_returns_immediately() {
        let (sweeper, _, _) = sweeper(SweepConfig {
            interval_seconds: 60,
            enabled: false,
        });
        assert!(sweeper.spawn().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let (sweeper, _, _) = sweeper(SweepConfig::default());
        let shutdown = sweeper.shutdown_notifier();
        let handle = sweeper.spawn();
        shutdown.notify_one();
        assert!(handle.await.is_ok());
    }
}
