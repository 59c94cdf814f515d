//! Error types for the VeraMoney assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Configuration
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // Agent Pipeline Errors
    // =============================

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Agent exceeded {0} model iterations without a final answer")]
    RecursionLimit(usize),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =============================
    // Knowledge Base Errors
    // =============================

    #[error("Document download error: {0}")]
    DocumentDownload(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Knowledge base not ready: {0}")]
    RagNotReady(String),

    // =============================
    // Persistence & Observability
    // =============================

    #[error("Database error: {0}")]
    Database(String),

    #[error("Observability error: {0}")]
    Observability(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssistantError {
    /// True when the underlying failure is an HTTP timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AssistantError::Http(e) if e.is_timeout())
    }
}
