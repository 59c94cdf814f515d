//! Core data models shared by the agent, tools, memory and API layers

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

//
// ================= Chat Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One entry of a conversation, persisted as JSON per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name for `tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(MessageRole::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Approximate token count (4 chars per token).
    pub fn token_estimate(&self) -> usize {
        let args_len: usize = self
            .tool_calls
            .iter()
            .map(|c| c.name.len() + c.arguments.to_string().len())
            .sum();
        (self.content.len() + args_len + 3) / 4
    }
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: Value,
}

impl ToolInput {
    pub fn from_call(call: &ToolCall) -> Self {
        Self {
            tool_name: call.name.clone(),
            parameters: call.arguments.clone(),
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Model-facing tool result. Known failures are reported in `content`
/// as a JSON error object with `success == false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub content: String,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn json<T: Serialize>(value: &T) -> crate::Result<Self> {
        Ok(Self::text(serde_json::to_string(value)?))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: json!({ "error": message.into() }).to_string(),
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self {
            success: false,
            content: json!({ "error": message.into(), "code": code }).to_string(),
        }
    }
}

//
// ================= API / Streaming =================
//

/// Tool call as reported by `/chat/complete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: Value,
}

/// Events pushed to the SSE stream while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Token { content: String },
    ToolCall { tool: String, args: Value },
    ToolResult { tool: String, result: String },
    Done,
    Error { message: String },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Token { .. } => "token",
            ChatEvent::ToolCall { .. } => "tool_call",
            ChatEvent::ToolResult { .. } => "tool_result",
            ChatEvent::Done => "done",
            ChatEvent::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ChatEvent::Token { content } => json!({ "content": content }),
            ChatEvent::ToolCall { tool, args } => json!({ "tool": tool, "args": args }),
            ChatEvent::ToolResult { tool, result } => json!({ "tool": tool, "result": result }),
            ChatEvent::Done => json!({}),
            ChatEvent::Error { message } => json!({ "message": message }),
        }
    }
}
