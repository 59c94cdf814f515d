use super::error::ApiError;
use crate::config::{SERVICE_NAME, SERVICE_VERSION};
use crate::models::ToolCallRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MESSAGE_MIN_CHARS: usize = 1;
pub const MESSAGE_MAX_CHARS: usize = 32_000;

/// Body of both `/chat` and `/chat/complete`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

impl ChatRequest {
    /// Check message length and return the parsed session id.
    pub fn validate(&self) -> Result<Uuid, ApiError> {
        let chars = self.message.chars().count();
        if !(MESSAGE_MIN_CHARS..=MESSAGE_MAX_CHARS).contains(&chars) {
            return Err(ApiError::Validation(format!(
                "message must be between {} and {} characters",
                MESSAGE_MIN_CHARS, MESSAGE_MAX_CHARS
            )));
        }
        Uuid::parse_str(&self.session_id)
            .map_err(|_| ApiError::Validation("session_id must be a valid UUID".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompleteResponse {
    pub response: String,
    pub tool_calls: Option<Vec<ToolCallRecord>>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            service: SERVICE_NAME,
            version: SERVICE_VERSION,
        }
    }
}
