//! Conversation memory
//!
//! Per-session history, checkpoint storage, and selection of the context
//! window replayed to the model.

pub mod checkpointer;
pub mod context_manager;
pub mod store;

pub use checkpointer::{MemoryStore, MAX_STORED_MESSAGES};
pub use context_manager::{ContextConfig, ContextManager};
pub use store::ConversationHistory;
