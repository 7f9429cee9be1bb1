//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::room::coordinator::RoomCoordinator;
use crate::room::core::config::RoomConfig;
use crate::room::core::errors::RoomResult;
use crate::room::maintenance::sweeper::StoreSweeper;
use crate::room::store::consultation_store::{ConsultationStore, SqliteConsultationStore};
use crate::room::store::memory_store::InMemorySharedStore;
use crate::room::store::shared_store::SharedStore;

/// Shared application state.
pub struct AppState {
    /// Room coordinator.
    pub coordinator: RoomCoordinator,
    /// Active configuration.
    pub config: RoomConfig,
    shared: Arc<InMemorySharedStore>,
}

impl AppState {
    /// Open the configured `SQLite` database and build the state.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the configuration
    /// is invalid.
    pub async fn new(config: RoomConfig) -> RoomResult<Arc<Self>> {
        let durable = SqliteConsultationStore::new(&config.storage).await?;
        Self::with_durable(config, Arc::new(durable))
    }

    /// Build the state over a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized or the
    /// configuration is invalid.
    pub async fn in_memory(config: RoomConfig) -> RoomResult<Arc<Self>> {
        let durable = SqliteConsultationStore::open_in_memory(&config.storage).await?;
        Self::with_durable(config, Arc::new(durable))
    }

    fn with_durable(
        config: RoomConfig,
        durable: Arc<dyn ConsultationStore>,
    ) -> RoomResult<Arc<Self>> {
        let shared = Arc::new(InMemorySharedStore::new());
        let coordinator = RoomCoordinator::new(
            &config,
            Arc::clone(&shared) as Arc<dyn SharedStore>,
            durable,
        )?;
        Ok(Arc::new(Self {
            coordinator,
            config,
            shared,
        }))
    }

    /// Sweeper over this state's ephemeral stores.
    #[must_use]
    pub fn sweeper(&self) -> StoreSweeper {
        StoreSweeper::new(
            Arc::clone(&self.shared),
            self.coordinator.presence(),
            self.coordinator.broker(),
            self.config.sweep.clone(),
        )
    }
}
