//! Specialist worker agents exposed to the supervisor as tools
//!
//! Each worker is a small agent with a single tool and no memory. Its
//! failures never reach the supervisor as errors, only as a short
//! message the supervisor can rephrase.

use super::prompts::{KNOWLEDGE_WORKER_PROMPT, STOCK_WORKER_PROMPT, WEATHER_WORKER_PROMPT};
use super::runner::Agent;
use crate::logging::sanitize_for_log;
use crate::models::{ToolInput, ToolOutput};
use crate::tools::Tool;
use crate::Result;
use serde_json::{json, Value};
use tracing::error;

pub const ASK_WEATHER_AGENT: &str = "ask_weather_agent";
pub const ASK_STOCK_AGENT: &str = "ask_stock_agent";
pub const ASK_KNOWLEDGE_AGENT: &str = "ask_knowledge_agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Weather,
    Stock,
    Knowledge,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [WorkerKind::Weather, WorkerKind::Stock, WorkerKind::Knowledge];

    pub fn name(self) -> &'static str {
        match self {
            WorkerKind::Weather => "weather",
            WorkerKind::Stock => "stock",
            WorkerKind::Knowledge => "knowledge",
        }
    }

    pub fn tool_name(self) -> &'static str {
        match self {
            WorkerKind::Weather => ASK_WEATHER_AGENT,
            WorkerKind::Stock => ASK_STOCK_AGENT,
            WorkerKind::Knowledge => ASK_KNOWLEDGE_AGENT,
        }
    }

    pub fn prompt_name(self) -> &'static str {
        match self {
            WorkerKind::Weather => "vera-weather-worker",
            WorkerKind::Stock => "vera-stock-worker",
            WorkerKind::Knowledge => "vera-knowledge-worker",
        }
    }

    pub fn fallback_prompt(self) -> &'static str {
        match self {
            WorkerKind::Weather => WEATHER_WORKER_PROMPT,
            WorkerKind::Stock => STOCK_WORKER_PROMPT,
            WorkerKind::Knowledge => KNOWLEDGE_WORKER_PROMPT,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            WorkerKind::Weather => "Route weather-related questions to the weather specialist. Use for: current weather, temperature, conditions, forecasts.",
            WorkerKind::Stock => "Route stock price questions to the stock specialist. Use for: stock prices, market data, ticker quotes.",
            WorkerKind::Knowledge => "Route knowledge base questions to the document specialist. Use for: VeraMoney history, fintech regulations, banking policies.",
        }
    }

    pub fn empty_message(self) -> String {
        let subject = match self {
            WorkerKind::Knowledge => "knowledge base",
            other => other.name(),
        };
        format!("I couldn't retrieve {} information right now. Please try again.", subject)
    }

    pub fn failure_message(self) -> String {
        format!(
            "I encountered an issue processing your {} request. Please try again.",
            self.name()
        )
    }
}

/// Model-call budget equivalent to a `2n + 1` graph step limit:
/// n tool rounds plus the final answer.
pub fn worker_iteration_limit(max_iterations: usize) -> usize {
    let recursion_limit = max_iterations * 2 + 1;
    (recursion_limit + 1) / 2
}

/// A worker agent wrapped as a supervisor tool.
pub struct WorkerTool {
    kind: WorkerKind,
    agent: Agent,
}

impl WorkerTool {
    pub fn new(kind: WorkerKind, agent: Agent) -> Self {
        Self { kind, agent }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }
}

#[async_trait::async_trait]
impl Tool for WorkerTool {
    fn name(&self) -> &'static str {
        self.kind.tool_name()
    }

    fn description(&self) -> &'static str {
        self.kind.description()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "The user's request, rephrased for the specialist"
                }
            },
            "required": ["request"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let request = input.str_param("request").unwrap_or_default();

        match self.agent.invoke(&[], request).await {
            Ok(run) if run.response.trim().is_empty() => Ok(ToolOutput::text(self.kind.empty_message())),
            Ok(run) => Ok(ToolOutput::text(run.response)),
            Err(e) => {
                let preview: String = request.chars().take(50).collect();
                error!(
                    worker = self.kind.name(),
                    request = %sanitize_for_log(&preview),
                    "Worker failed: {}",
                    e
                );
                Ok(ToolOutput::text(self.kind.failure_message()))
            }
        }
    }
}
