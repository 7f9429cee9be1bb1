//! Storage seams: the shared ephemeral store and the durable consultation store.

pub mod consultation_store;
pub mod memory_store;
pub mod shared_store;

pub use consultation_store::{
    ConsultationRecord, ConsultationStatus, ConsultationStore, SqliteConsultationStore,
};
pub use memory_store::InMemorySharedStore;
pub use shared_store::{SharedStore, StoreFuture};
