//! Tool-calling agent loop
//!
//! MODEL → TOOLS → MODEL → ... → FINAL ANSWER
//!
//! Each iteration sends system prompt + replayed history + this run's
//! messages. Tool calls requested in one model turn run concurrently.

use super::middleware::{AgentMiddleware, ModelCall, RunContext};
use crate::error::AssistantError;
use crate::llm::{ChatModel, TokenUsage};
use crate::models::{ChatEvent, ChatMessage, ToolCall, ToolInput, ToolOutput};
use crate::tools::ToolRegistry;
use crate::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Result of one agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub response: String,
    /// Messages produced by this run, starting with the user message.
    pub messages: Vec<ChatMessage>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

pub struct Agent {
    name: String,
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    tools: ToolRegistry,
    middleware: Vec<Arc<dyn AgentMiddleware>>,
    max_iterations: usize,
    session_id: Option<String>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        model: Arc<dyn ChatModel>,
        system_prompt: impl Into<String>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            system_prompt: system_prompt.into(),
            tools,
            middleware: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            session_id: None,
        }
    }

    pub fn with_middleware(mut self, middleware: Vec<Arc<dyn AgentMiddleware>>) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.list()
    }

    pub async fn invoke(&self, history: &[ChatMessage], input: &str) -> Result<AgentRun> {
        self.run(history, input, None).await
    }

    /// Like `invoke`, pushing token and tool events to `events` as they happen.
    pub async fn stream(
        &self,
        history: &[ChatMessage],
        input: &str,
        events: &UnboundedSender<ChatEvent>,
    ) -> Result<AgentRun> {
        self.run(history, input, Some(events)).await
    }

    async fn run(
        &self,
        history: &[ChatMessage],
        input: &str,
        events: Option<&UnboundedSender<ChatEvent>>,
    ) -> Result<AgentRun> {
        let ctx = RunContext {
            agent: self.name.clone(),
            model: self.model.model_name().to_string(),
            session_id: self.session_id.clone(),
        };
        let definitions = self.tools.definitions();
        let mut turn = vec![ChatMessage::user(input)];
        let mut tool_calls = Vec::new();
        let mut usage = TokenUsage::default();

        for iteration in 1..=self.max_iterations {
            let mut request = Vec::with_capacity(history.len() + turn.len() + 1);
            request.push(ChatMessage::system(self.system_prompt.as_str()));
            request.extend_from_slice(history);
            request.extend_from_slice(&turn);

            for middleware in &self.middleware {
                middleware.before_model(&ctx, &request, &definitions).await;
            }

            let started = Instant::now();
            let completion = match events {
                Some(tx) => {
                    let on_token = |token: &str| {
                        let _ = tx.send(ChatEvent::Token {
                            content: token.to_string(),
                        });
                    };
                    self.model
                        .complete_streaming(&request, &definitions, &on_token)
                        .await?
                }
                None => self.model.complete(&request, &definitions).await?,
            };
            let elapsed = started.elapsed();

            if let Some(u) = completion.usage {
                usage.prompt_tokens += u.prompt_tokens;
                usage.completion_tokens += u.completion_tokens;
                usage.total_tokens += u.total_tokens;
            }

            let message = completion.message.clone();
            turn.push(message.clone());

            let call = ModelCall {
                request: &request,
                turn: &turn,
                completion: &completion,
                elapsed,
            };
            for middleware in &self.middleware {
                middleware.after_model(&ctx, &call).await;
            }

            if !message.has_tool_calls() {
                debug!(agent = %self.name, iteration, "Agent finished");
                return Ok(AgentRun {
                    response: message.content,
                    messages: turn,
                    tool_calls,
                    usage,
                });
            }

            if let Some(tx) = events {
                for call in &message.tool_calls {
                    let _ = tx.send(ChatEvent::ToolCall {
                        tool: call.name.clone(),
                        args: call.arguments.clone(),
                    });
                }
            }

            let outputs = join_all(message.tool_calls.iter().map(|call| self.execute_tool(&ctx, call)))
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?;

            for (call, output) in message.tool_calls.iter().zip(outputs) {
                if let Some(tx) = events {
                    let _ = tx.send(ChatEvent::ToolResult {
                        tool: call.name.clone(),
                        result: output.content.clone(),
                    });
                }
                turn.push(ChatMessage::tool_result(call, output.content));
            }
            tool_calls.extend(message.tool_calls);
        }

        warn!(agent = %self.name, max_iterations = self.max_iterations, "Agent hit iteration limit");
        Err(AssistantError::RecursionLimit(self.max_iterations))
    }

    async fn execute_tool(&self, ctx: &RunContext, call: &ToolCall) -> Result<ToolOutput> {
        let started = Instant::now();
        let result = match self.tools.get(&call.name) {
            Some(tool) => tool.execute(&ToolInput::from_call(call)).await,
            None => Err(AssistantError::ToolNotFound(call.name.clone())),
        };

        let output = match result {
            Ok(output) => output,
            Err(error) => self.recover_tool_error(ctx, call, error)?,
        };

        let elapsed = started.elapsed();
        for middleware in &self.middleware {
            middleware.after_tool(ctx, call, &output, elapsed).await;
        }
        Ok(output)
    }

    fn recover_tool_error(&self, ctx: &RunContext, call: &ToolCall, error: AssistantError) -> Result<ToolOutput> {
        self.middleware
            .iter()
            .find_map(|m| m.on_tool_error(ctx, call, &error))
            .map(|content| ToolOutput {
                success: false,
                content,
            })
            .ok_or(error)
    }
}
