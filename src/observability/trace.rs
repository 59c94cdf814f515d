//! Per-request Langfuse trace
//!
//! Model calls become generations and tool calls become spans under one
//! trace. Events are buffered in memory and sent in a single ingestion
//! batch when the request completes.

use super::client::LangfuseClient;
use crate::agent::middleware::{AgentMiddleware, ModelCall, RunContext};
use crate::models::{ToolCall, ToolOutput};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct TraceInfo {
    pub name: String,
    pub session_id: Option<String>,
    pub tags: Vec<String>,
    pub input: Option<String>,
    pub metadata: Value,
}

pub struct TraceRecorder {
    client: LangfuseClient,
    trace_id: String,
    events: Mutex<Vec<Value>>,
}

fn event(kind: &str, body: Value) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "timestamp": Utc::now().to_rfc3339(),
        "type": kind,
        "body": body,
    })
}

fn started_at(elapsed: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
}

impl TraceRecorder {
    pub fn new(client: LangfuseClient, environment: &str, info: TraceInfo) -> Self {
        let trace_id = Uuid::new_v4().to_string();
        let trace = event(
            "trace-create",
            json!({
                "id": trace_id,
                "name": info.name,
                "sessionId": info.session_id,
                "tags": info.tags,
                "environment": environment,
                "input": info.input,
                "metadata": info.metadata,
            }),
        );

        Self {
            client,
            trace_id,
            events: Mutex::new(vec![trace]),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub async fn pending_events(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Attach the final answer to the trace.
    pub async fn set_output(&self, output: &str) {
        let update = event("trace-create", json!({ "id": self.trace_id, "output": output }));
        self.events.lock().await.push(update);
    }

    /// Send buffered events. Failures are logged and dropped.
    pub async fn flush(&self) {
        let batch: Vec<Value> = std::mem::take(&mut *self.events.lock().await);
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.client.ingest(&batch).await {
            warn!(trace_id = %self.trace_id, events = batch.len(), "Failed to flush Langfuse trace: {}", e);
        }
    }
}

#[async_trait::async_trait]
impl AgentMiddleware for TraceRecorder {
    fn name(&self) -> &'static str {
        "langfuse_tracing"
    }

    async fn after_model(&self, ctx: &RunContext, call: &ModelCall<'_>) {
        let end = Utc::now();
        let usage = call.completion.usage.map(|u| {
            json!({
                "input": u.prompt_tokens,
                "output": u.completion_tokens,
                "total": u.total_tokens,
                "unit": "TOKENS",
            })
        });

        let generation = event(
            "generation-create",
            json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": self.trace_id,
                "name": ctx.agent,
                "model": ctx.model,
                "input": call.request,
                "output": call.completion.message,
                "usage": usage,
                "startTime": started_at(call.elapsed).to_rfc3339(),
                "endTime": end.to_rfc3339(),
                "metadata": { "input_messages": call.request.len() },
            }),
        );
        self.events.lock().await.push(generation);
    }

    async fn after_tool(&self, ctx: &RunContext, call: &ToolCall, output: &ToolOutput, elapsed: Duration) {
        let level = if output.success { "DEFAULT" } else { "WARNING" };
        let span = event(
            "span-create",
            json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": self.trace_id,
                "name": call.name,
                "input": call.arguments,
                "output": output.content,
                "level": level,
                "startTime": started_at(elapsed).to_rfc3339(),
                "endTime": Utc::now().to_rfc3339(),
                "metadata": { "agent": ctx.agent },
            }),
        );
        self.events.lock().await.push(span);
    }
}
