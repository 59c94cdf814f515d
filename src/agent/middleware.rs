//! Hooks around model and tool calls
//!
//! Every agent carries a stack of middleware. Hooks are observational
//! except `on_tool_error`, which may turn an unexpected tool failure into
//! a message the model can read instead of failing the whole run.

use crate::error::AssistantError;
use crate::llm::{Completion, ToolDefinition};
use crate::models::{ChatMessage, ToolCall, ToolOutput};
use crate::tools::{TOOL_KNOWLEDGE, TOOL_STOCK, TOOL_WEATHER};
use std::time::Duration;
use tracing::{debug, error, info};

/// Identifies the agent a hook is running for.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub agent: String,
    pub model: String,
    pub session_id: Option<String>,
}

/// A finished model call.
pub struct ModelCall<'a> {
    /// Full request sent to the model (system prompt included).
    pub request: &'a [ChatMessage],
    /// Messages produced in this run so far, ending with the new assistant message.
    pub turn: &'a [ChatMessage],
    pub completion: &'a Completion,
    pub elapsed: Duration,
}

impl ModelCall<'_> {
    /// Final answers carry no tool calls.
    pub fn is_final(&self) -> bool {
        !self.completion.message.has_tool_calls()
    }
}

#[async_trait::async_trait]
pub trait AgentMiddleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before_model(
        &self,
        _ctx: &RunContext,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) {
    }

    async fn after_model(&self, _ctx: &RunContext, _call: &ModelCall<'_>) {}

    async fn after_tool(
        &self,
        _ctx: &RunContext,
        _call: &ToolCall,
        _output: &ToolOutput,
        _elapsed: Duration,
    ) {
    }

    /// Replacement content for a failed tool call, or `None` to let the error through.
    fn on_tool_error(
        &self,
        _ctx: &RunContext,
        _call: &ToolCall,
        _error: &AssistantError,
    ) -> Option<String> {
        None
    }
}

//
// ================= Logging =================
//

/// Request/response logging. The supervisor logs at debug, workers at info.
pub struct LoggingMiddleware {
    worker: bool,
}

impl LoggingMiddleware {
    pub fn supervisor() -> Self {
        Self { worker: false }
    }

    pub fn worker() -> Self {
        Self { worker: true }
    }
}

#[async_trait::async_trait]
impl AgentMiddleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        if self.worker {
            "worker_logging"
        } else {
            "logging"
        }
    }

    async fn before_model(&self, ctx: &RunContext, messages: &[ChatMessage], tools: &[ToolDefinition]) {
        let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        if self.worker {
            info!(agent = %ctx.agent, tools = ?tool_names, "Worker request");
        } else {
            debug!(
                agent = %ctx.agent,
                session = ctx.session_id.as_deref().unwrap_or("unknown"),
                messages = messages.len(),
                tools = ?tool_names,
                "Agent request"
            );
        }
    }

    async fn after_model(&self, ctx: &RunContext, call: &ModelCall<'_>) {
        let message = &call.completion.message;
        let duration_ms = call.elapsed.as_secs_f64() * 1000.0;
        if self.worker {
            info!(
                agent = %ctx.agent,
                duration_ms,
                content_len = message.content.len(),
                "Worker response"
            );
        } else {
            debug!(
                agent = %ctx.agent,
                session = ctx.session_id.as_deref().unwrap_or("unknown"),
                content_len = message.content.len(),
                tool_calls = message.tool_calls.len(),
                duration_ms,
                "Agent response"
            );
        }
    }
}

//
// ================= Tool errors =================
//

/// Turns unexpected tool failures into a short apology the model can relay.
pub struct ToolErrorHandler;

impl ToolErrorHandler {
    pub fn service_name(tool: &str) -> &str {
        match tool {
            TOOL_WEATHER => "weather data",
            TOOL_STOCK => "stock market data",
            TOOL_KNOWLEDGE => "knowledge base",
            other => other,
        }
    }

    pub fn message_for(tool: &str) -> String {
        format!(
            "I'm having trouble accessing {} right now. Please try again.",
            Self::service_name(tool)
        )
    }
}

#[async_trait::async_trait]
impl AgentMiddleware for ToolErrorHandler {
    fn name(&self) -> &'static str {
        "tool_error_handler"
    }

    fn on_tool_error(&self, ctx: &RunContext, call: &ToolCall, err: &AssistantError) -> Option<String> {
        error!(
            agent = %ctx.agent,
            tool = %call.name,
            args = %call.arguments,
            "Tool call failed: {}",
            err
        );
        Some(Self::message_for(&call.name))
    }
}
