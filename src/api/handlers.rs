use super::error::{ApiError, ApiResult};
use super::schemas::{ChatCompleteResponse, ChatRequest, HealthResponse};
use super::AppState;
use crate::agent::{AgentRun, Supervisor, ASK_STOCK_AGENT};
use crate::classifier::expected_tools;
use crate::logging::sanitize_for_log;
use crate::memory::{ConversationHistory, MemoryStore};
use crate::models::{ChatEvent, ChatMessage, ToolCall, ToolCallRecord};
use crate::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde_json::Value;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::OwnedMutexGuard;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const NO_RESPONSE: &str = "No response generated.";
pub const STREAM_ERROR_MESSAGE: &str = "An error occurred during processing";
const UNKNOWN_TICKER: &str = "UNKNOWN";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Everything loaded before the supervisor runs. Holds the session's turn
/// lock until dropped.
struct Turn {
    _lock: OwnedMutexGuard<()>,
    session_id: Uuid,
    message: String,
    memory: Arc<MemoryStore>,
    history: ConversationHistory,
    window: Vec<ChatMessage>,
    supervisor: Supervisor,
}

impl Turn {
    async fn begin(state: &AppState, session_id: Uuid, message: String) -> Result<Self> {
        let lock = state.sessions.acquire(session_id).await;
        let memory = state.factory.memory().await?;
        let history = memory.load(session_id).await?;

        if history.is_empty() {
            let tools = expected_tools(&message);
            debug!(session = %session_id, expected_tools = ?tools, "Opening message");
            state
                .datasets
                .add_opening_message(&message, &session_id.to_string(), &tools, &state.settings.agent_model)
                .await;
        }

        let window = state.context.select_window(&history);
        debug!(
            session = %session_id,
            stored = history.message_count(),
            window = window.len(),
            context_usage = state.context.usage_percent(&history),
            "Selected context window"
        );

        let supervisor = state.factory.create(session_id, &message).await?;
        Ok(Self {
            _lock: lock,
            session_id,
            message,
            memory,
            history,
            window,
            supervisor,
        })
    }

    /// Record datasets, persist the conversation and flush the trace.
    async fn finish(mut self, state: &AppState, run: &AgentRun) {
        let session = self.session_id.to_string();
        for call in run.tool_calls.iter().filter(|c| c.name == ASK_STOCK_AGENT) {
            let ticker = call
                .arguments
                .get("ticker")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_TICKER);
            state.datasets.add_stock_query(ticker, &self.message, &session).await;
        }

        self.history.extend(run.messages.iter().cloned());
        if let Err(e) = self.memory.save(&self.history).await {
            warn!(session = %self.session_id, "Failed to save conversation: {}", e);
        }

        if let Some(trace) = &self.supervisor.trace {
            trace.set_output(&run.response).await;
            trace.flush().await;
            debug!(session = %self.session_id, trace_id = trace.trace_id(), "Langfuse flushed");
        }
    }

    async fn abort(self) {
        if let Some(trace) = &self.supervisor.trace {
            trace.flush().await;
        }
    }
}

/// Supervisor tool calls, first occurrence of each (name, args) pair.
pub fn dedup_tool_calls(calls: &[ToolCall]) -> Option<Vec<ToolCallRecord>> {
    let mut seen = HashSet::new();
    let records: Vec<ToolCallRecord> = calls
        .iter()
        .filter(|call| seen.insert((call.name.clone(), canonical_args(&call.arguments))))
        .map(|call| ToolCallRecord {
            tool: call.name.clone(),
            input: call.arguments.clone(),
        })
        .collect();

    (!records.is_empty()).then_some(records)
}

fn canonical_args(args: &Value) -> String {
    match args.as_object() {
        Some(map) => {
            let mut pairs: Vec<(&String, String)> = map.iter().map(|(k, v)| (k, v.to_string())).collect();
            pairs.sort();
            format!("{:?}", pairs)
        }
        None => args.to_string(),
    }
}

pub async fn chat_complete(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatCompleteResponse>> {
    let Json(request) = payload?;
    let session_id = request.validate()?;
    info!(
        session = %session_id,
        message = %sanitize_for_log(&request.message),
        "chat_complete request"
    );

    let turn = Turn::begin(&state, session_id, request.message).await?;
    let result = turn.supervisor.agent.invoke(&turn.window, &turn.message).await;
    let run = match result {
        Ok(run) => run,
        Err(e) => {
            error!(session = %session_id, "chat_complete failed: {}", e);
            turn.abort().await;
            return Err(ApiError::Internal(e));
        }
    };

    let tool_calls = dedup_tool_calls(&run.tool_calls);
    turn.finish(&state, &run).await;

    let response = if run.response.is_empty() {
        NO_RESPONSE.to_string()
    } else {
        run.response
    };
    info!(
        session = %session_id,
        response_len = response.len(),
        tool_calls = tool_calls.as_ref().map_or(0, Vec::len),
        total_tokens = run.usage.total_tokens,
        "chat_complete finished"
    );

    Ok(Json(ChatCompleteResponse { response, tool_calls }))
}

pub async fn chat_stream(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let Json(request) = payload?;
    let session_id = request.validate()?;
    info!(
        session = %session_id,
        message = %sanitize_for_log(&request.message),
        "chat stream request"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = stream_turn(&state, session_id, request.message, &tx).await {
            error!(session = %session_id, "Stream failed: {}", e);
            let _ = tx.send(ChatEvent::Error {
                message: STREAM_ERROR_MESSAGE.to_string(),
            });
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

async fn stream_turn(
    state: &AppState,
    session_id: Uuid,
    message: String,
    events: &UnboundedSender<ChatEvent>,
) -> Result<()> {
    let turn = Turn::begin(state, session_id, message).await?;
    let result = turn.supervisor.agent.stream(&turn.window, &turn.message, events).await;
    let run = match result {
        Ok(run) => run,
        Err(e) => {
            turn.abort().await;
            return Err(e);
        }
    };

    turn.finish(state, &run).await;
    let _ = events.send(ChatEvent::Done);
    Ok(())
}

fn to_sse_event(event: &ChatEvent) -> Event {
    Event::default().event(event.name()).data(event.payload().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tool_call;
    use serde_json::json;

    #[test]
    fn test_dedup_ignores_argument_order() {
        let calls = vec![
            tool_call("1", ASK_STOCK_AGENT, json!({ "request": "AAPL", "ticker": "AAPL" })),
            tool_call("2", ASK_STOCK_AGENT, json!({ "ticker": "AAPL", "request": "AAPL" })),
            tool_call("3", ASK_STOCK_AGENT, json!({ "request": "MSFT" })),
            tool_call("4", "ask_weather_agent", json!({ "request": "MSFT" })),
        ];

        let records = dedup_tool_calls(&calls).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].tool, ASK_STOCK_AGENT);
        assert_eq!(records[1].input, json!({ "request": "MSFT" }));
        assert_eq!(records[2].tool, "ask_weather_agent");

        assert!(dedup_tool_calls(&[]).is_none());
    }
}
