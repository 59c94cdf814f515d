//! Supervisor/worker agent
//!
//! The supervisor answers the user and delegates to three specialist
//! workers (weather, stock, knowledge), each exposed to it as a tool.
//! Middleware hooks add logging, tool-error recovery, output checks and
//! Langfuse tracing around every model and tool call.

pub mod guardrails;
pub mod middleware;
pub mod prompts;
pub mod runner;
pub mod supervisor;
pub mod workers;

pub use guardrails::{KnowledgeGuardrails, OutputGuardrails};
pub use middleware::{AgentMiddleware, LoggingMiddleware, ModelCall, RunContext, ToolErrorHandler};
pub use runner::{Agent, AgentRun, DEFAULT_MAX_ITERATIONS};
pub use supervisor::{RunConfig, Supervisor, SupervisorFactory};
pub use workers::{WorkerKind, WorkerTool, ASK_KNOWLEDGE_AGENT, ASK_STOCK_AGENT, ASK_WEATHER_AGENT};
