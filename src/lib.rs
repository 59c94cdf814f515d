//! VeraMoney Assistant
//!
//! A conversational financial assistant service that:
//! - Answers through a supervisor agent delegating to weather, stock and knowledge workers
//! - Calls live weather and market data APIs as model tools
//! - Retrieves cited passages from the VeraMoney document set
//! - Checkpoints every conversation per session
//! - Optionally traces, versions prompts and collects datasets in Langfuse
//!
//! REQUEST FLOW:
//! AUTH → RATE LIMIT → LOAD HISTORY → SUPERVISOR ⇄ WORKERS → SAVE → FLUSH TRACE

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod models;
pub mod observability;
pub mod rag;
pub mod retry;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use error::{AssistantError, Result};

// Re-export common types
pub use models::*;
pub use config::Settings;
