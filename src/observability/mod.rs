//! Optional Langfuse integration: tracing, prompt management, datasets

pub mod client;
pub mod datasets;
pub mod manager;
pub mod prompts;
pub mod trace;

pub use client::LangfuseClient;
pub use datasets::{DatasetManager, STOCK_QUERIES, USER_OPENING_MESSAGES};
pub use manager::LangfuseManager;
pub use prompts::{PromptManager, PromptMetadata, PromptSource};
pub use trace::{TraceInfo, TraceRecorder};
