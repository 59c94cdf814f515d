//! Supervisor construction
//!
//! A supervisor is assembled per request: fresh prompt (possibly from
//! Langfuse), fresh trace, worker agents wrapped as tools. The memory
//! store is shared and initialized once on first use.

use super::guardrails::{KnowledgeGuardrails, OutputGuardrails};
use super::middleware::{AgentMiddleware, LoggingMiddleware, ToolErrorHandler};
use super::prompts::AGENT_VERSION;
use super::runner::Agent;
use super::workers::{worker_iteration_limit, WorkerKind, WorkerTool};
use crate::config::Settings;
use crate::llm::{ChatModel, OpenAiClient};
use crate::memory::MemoryStore;
use crate::observability::{LangfuseManager, PromptManager, TraceInfo, TraceRecorder};
use crate::rag::KnowledgeRetriever;
use crate::tools::{
    AlpacaClient, KnowledgeTool, StockTool, Tool, ToolRegistry, WeatherApiClient, WeatherTool, TOOL_KNOWLEDGE,
    TOOL_STOCK, TOOL_WEATHER,
};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

pub const RUN_NAME: &str = "veramoney-supervisor";
pub const RUN_TAGS: [&str; 2] = ["veramoney-chat", "supervisor"];

/// Per-request run settings, mirrored into the Langfuse trace.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub thread_id: Uuid,
    pub run_name: &'static str,
    pub tags: Vec<String>,
    pub metadata: Value,
}

pub struct Supervisor {
    pub agent: Agent,
    pub config: RunConfig,
    pub trace: Option<Arc<TraceRecorder>>,
}

fn base_tool_for(kind: WorkerKind) -> &'static str {
    match kind {
        WorkerKind::Weather => TOOL_WEATHER,
        WorkerKind::Stock => TOOL_STOCK,
        WorkerKind::Knowledge => TOOL_KNOWLEDGE,
    }
}

pub struct SupervisorFactory {
    settings: Arc<Settings>,
    supervisor_model: Arc<dyn ChatModel>,
    worker_model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    langfuse: Arc<LangfuseManager>,
    prompts: Arc<PromptManager>,
    memory: OnceCell<Arc<MemoryStore>>,
}

impl SupervisorFactory {
    pub fn new(
        settings: Arc<Settings>,
        supervisor_model: Arc<dyn ChatModel>,
        worker_model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        langfuse: Arc<LangfuseManager>,
        prompts: Arc<PromptManager>,
    ) -> Self {
        Self {
            settings,
            supervisor_model,
            worker_model,
            tools,
            langfuse,
            prompts,
            memory: OnceCell::new(),
        }
    }

    /// OpenAI models and the live weather, stock and knowledge tools.
    pub fn from_settings(
        settings: Arc<Settings>,
        retriever: Option<KnowledgeRetriever>,
        langfuse: Arc<LangfuseManager>,
        prompts: Arc<PromptManager>,
    ) -> Result<Self> {
        let openai = OpenAiClient::new(&settings.openai_api_key, &settings.openai_base_url)?;
        let supervisor_model = openai.chat_model(
            &settings.agent_model,
            Duration::from_secs(settings.agent_timeout_seconds),
        );
        let worker_model = openai.chat_model(
            &settings.worker_model,
            Duration::from_secs(settings.worker_timeout_seconds),
        );

        let tools = ToolRegistry::with_tools(vec![
            Arc::new(WeatherTool::new(WeatherApiClient::new(settings.weatherapi_key.clone())?)) as Arc<dyn Tool>,
            Arc::new(StockTool::new(AlpacaClient::new(
                settings.alpaca_api_key.clone(),
                settings.alpaca_secret_key.clone(),
                settings.alpaca_use_sandbox,
            )?)),
            Arc::new(KnowledgeTool::new(retriever)),
        ]);

        Ok(Self::new(
            settings,
            Arc::new(supervisor_model),
            Arc::new(worker_model),
            tools,
            langfuse,
            prompts,
        ))
    }

    /// Use an existing store instead of building one from settings.
    pub fn with_memory(mut self, store: Arc<MemoryStore>) -> Self {
        self.memory = OnceCell::new_with(Some(store));
        self
    }

    pub fn has_langfuse(&self) -> bool {
        self.langfuse.is_enabled()
    }

    /// The shared memory store, created and initialized on first call.
    pub async fn memory(&self) -> Result<Arc<MemoryStore>> {
        let store = self
            .memory
            .get_or_init(|| async { Arc::new(MemoryStore::from_settings(&self.settings)) })
            .await;
        store.initialize().await?;
        Ok(store.clone())
    }

    pub async fn create(&self, session_id: Uuid, user_message: &str) -> Result<Supervisor> {
        self.memory().await?;

        let (prompt, prompt_metadata) = self.prompts.supervisor_prompt().await;
        let mut metadata = serde_json::to_value(&prompt_metadata)?;
        metadata["agent_version"] = json!(AGENT_VERSION);

        let config = RunConfig {
            thread_id: session_id,
            run_name: RUN_NAME,
            tags: RUN_TAGS.iter().map(|t| t.to_string()).collect(),
            metadata: metadata.clone(),
        };

        let trace = self.langfuse.start_trace(TraceInfo {
            name: RUN_NAME.to_string(),
            session_id: Some(session_id.to_string()),
            tags: config.tags.clone(),
            input: Some(user_message.to_string()),
            metadata,
        });

        let mut workers: Vec<Arc<dyn Tool>> = Vec::with_capacity(WorkerKind::ALL.len());
        for kind in WorkerKind::ALL {
            workers.push(Arc::new(self.build_worker(kind, session_id, trace.as_ref()).await));
        }

        let mut middleware: Vec<Arc<dyn AgentMiddleware>> = vec![
            Arc::new(LoggingMiddleware::supervisor()),
            Arc::new(ToolErrorHandler),
            Arc::new(OutputGuardrails),
            Arc::new(KnowledgeGuardrails),
        ];
        if let Some(trace) = &trace {
            middleware.push(trace.clone());
        }

        let agent = Agent::new(
            RUN_NAME,
            self.supervisor_model.clone(),
            prompt,
            ToolRegistry::with_tools(workers),
        )
        .with_middleware(middleware)
        .with_session(session_id.to_string());

        info!(
            session = %session_id,
            model = self.supervisor_model.model_name(),
            workers = ?agent.tool_names(),
            prompt_source = ?prompt_metadata.prompt_source,
            langfuse_enabled = self.has_langfuse(),
            "Created supervisor"
        );

        Ok(Supervisor { agent, config, trace })
    }

    async fn build_worker(&self, kind: WorkerKind, session_id: Uuid, trace: Option<&Arc<TraceRecorder>>) -> WorkerTool {
        let (prompt, metadata) = self.prompts.worker_prompt(kind).await;
        let tools: Vec<Arc<dyn Tool>> = self.tools.get(base_tool_for(kind)).into_iter().collect();

        let mut middleware: Vec<Arc<dyn AgentMiddleware>> = vec![
            Arc::new(LoggingMiddleware::worker()),
            Arc::new(OutputGuardrails),
            Arc::new(KnowledgeGuardrails),
        ];
        if let Some(trace) = trace {
            middleware.push(trace.clone());
        }

        let agent = Agent::new(
            format!("{}-worker", kind.name()),
            self.worker_model.clone(),
            prompt,
            ToolRegistry::with_tools(tools),
        )
        .with_middleware(middleware)
        .with_max_iterations(worker_iteration_limit(self.settings.worker_max_iterations))
        .with_session(session_id.to_string());

        info!(
            worker = kind.name(),
            model = self.worker_model.model_name(),
            prompt_source = ?metadata.prompt_source,
            "Created worker"
        );

        WorkerTool::new(kind, agent)
    }
}
