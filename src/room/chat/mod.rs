//! Ephemeral chat queue, export artifacts and end-of-call finalization.

pub mod export;
pub mod finalize;
pub mod message;
pub mod queue;

pub use export::{ChatExporter, history_hash, render_transcript};
pub use finalize::{FinalizeOutcome, FinalizePipeline};
pub use message::{ChatDraft, ChatMessage, ChatMessageType};
pub use queue::ChatQueue;
