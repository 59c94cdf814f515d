//! OpenAI API client (chat completions + embeddings)
//!
//! One long-lived reqwest::Client is shared by every model handle so
//! supervisor, workers and the embedder reuse the same connection pool.

use super::stream::{parse_arguments, StreamAccumulator};
use super::{ChatModel, Completion, Embedder, TokenUsage, ToolDefinition};
use crate::error::AssistantError;
use crate::models::{ChatMessage, MessageRole, ToolCall};
use crate::Result;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Reusable OpenAI client (connection-pooled)
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn chat_model(&self, model: impl Into<String>, timeout: Duration) -> OpenAiChatModel {
        OpenAiChatModel {
            api: self.clone(),
            model: model.into(),
            timeout,
        }
    }

    pub fn embeddings(&self, model: impl Into<String>) -> OpenAiEmbeddings {
        OpenAiEmbeddings {
            api: self.clone(),
            model: model.into(),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T, timeout: Duration) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("OpenAI request to {} failed: {}", path, e);
                AssistantError::Llm(format!("OpenAI request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            error!("OpenAI error response ({}): {}", status, body);
            return Err(AssistantError::Llm(format!("OpenAI returned {}", status)));
        }

        Ok(response)
    }
}

// =============================
// Chat completions
// =============================

pub struct OpenAiChatModel {
    api: OpenAiClient,
    model: String,
    timeout: Duration,
}

impl OpenAiChatModel {
    fn request<'a>(&'a self, messages: &[ChatMessage], tools: &'a [ToolDefinition], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tools.iter().map(WireTool::from).collect(),
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Result<Completion> {
        let request = self.request(messages, tools, false);
        debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "Calling chat completions");

        let response: ChatResponse = self
            .api
            .post("/chat/completions", &request, self.timeout)
            .await?
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("OpenAI parse error: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AssistantError::Llm("No choices in OpenAI response".to_string()))?;

        Ok(Completion {
            message: choice.message.into_chat_message(),
            usage: response.usage,
        })
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        on_token: &(dyn for<'t> Fn(&'t str) + Send + Sync),
    ) -> Result<Completion> {
        let request = self.request(messages, tools, true);
        debug!(model = %self.model, messages = messages.len(), "Streaming chat completions");

        let response = self.api.post("/chat/completions", &request, self.timeout).await?;
        let mut body = response.bytes_stream();
        let mut accumulator = StreamAccumulator::new();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AssistantError::Llm(format!("OpenAI stream error: {}", e)))?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if let Some(delta) = accumulator.push_line(&line)? {
                    on_token(&delta);
                }
            }

            if accumulator.is_done() {
                break;
            }
        }

        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).to_string();
            if let Some(delta) = accumulator.push_line(&line)? {
                on_token(&delta);
            }
        }

        Ok(accumulator.finish())
    }
}

// =============================
// Embeddings
// =============================

pub struct OpenAiEmbeddings {
    api: OpenAiClient,
    model: String,
}

#[async_trait::async_trait]
impl Embedder for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response: EmbeddingResponse = self
            .api
            .post("/embeddings", &request, Duration::from_secs(60))
            .await?
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Embedding parse error: {}", e)))?;

        if response.data.len() != texts.len() {
            return Err(AssistantError::Llm(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

// =============================
// Wire format
// =============================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: MessageRole,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let content = if message.content.is_empty() && message.has_tool_calls() {
            None
        } else {
            Some(message.content.clone())
        };

        Self {
            role: message.role,
            content,
            tool_calls: message.tool_calls.iter().map(WireToolCall::from).collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl WireMessage {
    fn into_chat_message(self) -> ChatMessage {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect();
        ChatMessage::assistant_with_calls(self.content.unwrap_or_default(), tool_calls)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        let arguments = match &call.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunction {
                name: call.name.clone(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(def: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: WireFunctionDef {
                name: &def.name,
                description: &def.description,
                parameters: &def.parameters,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use axum::{routing::post, Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_request_serialization() {
        let client = OpenAiClient::new("sk-test", "http://localhost").unwrap();
        let model = client.chat_model("gpt-4o-mini", Duration::from_secs(5));
        let tools = vec![ToolDefinition {
            name: "get_weather".into(),
            description: "Current weather".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        }];
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: json!({ "city_name": "Paris" }),
        };
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::assistant_with_calls("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "{\"temperature_celsius\":18}"),
        ];

        let json = serde_json::to_value(model.request(&messages, &tools, false)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "get_weather");
        assert!(json["messages"][1]["content"].is_null());
        assert_eq!(json["messages"][1]["tool_calls"][0]["function"]["arguments"], "{\"city_name\":\"Paris\"}");
        assert_eq!(json["messages"][2]["tool_call_id"], "call_1");
        assert!(json.get("stream").is_none());
    }

    #[tokio::test]
    async fn test_complete_parses_tool_calls() {
        let seen = Arc::new(Mutex::new(None::<Value>));
        let seen_in_handler = seen.clone();
        let router = Router::new().route(
            "/chat/completions",
            post(move |Json(body): Json<Value>| {
                let seen = seen_in_handler.clone();
                async move {
                    *seen.lock().unwrap() = Some(body);
                    Json(json!({
                        "choices": [{
                            "message": {
                                "role": "assistant",
                                "content": null,
                                "tool_calls": [{
                                    "id": "call_9",
                                    "type": "function",
                                    "function": { "name": "get_stock_price", "arguments": "{\"ticker\":\"AAPL\"}" }
                                }]
                            },
                            "finish_reason": "tool_calls"
                        }],
                        "usage": { "prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19 }
                    }))
                }
            }),
        );
        let base = spawn_stub(router).await;

        let model = OpenAiClient::new("sk-test", base)
            .unwrap()
            .chat_model("gpt-4o-mini", Duration::from_secs(5));
        let completion = model
            .complete(&[ChatMessage::user("AAPL price?")], &[])
            .await
            .unwrap();

        assert_eq!(completion.message.tool_calls.len(), 1);
        assert_eq!(completion.message.tool_calls[0].arguments, json!({ "ticker": "AAPL" }));
        assert_eq!(completion.usage.unwrap().total_tokens, 19);
        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["messages"][0]["content"], "AAPL price?");
    }

    #[tokio::test]
    async fn test_streaming_forwards_tokens() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\", Vera\"}}]}\n\n",
                    "data: [DONE]\n\n"
                )
            }),
        );
        let base = spawn_stub(router).await;

        let model = OpenAiClient::new("sk-test", base)
            .unwrap()
            .chat_model("gpt-4o-mini", Duration::from_secs(5));
        let tokens = Mutex::new(Vec::<String>::new());
        let completion = model
            .complete_streaming(&[ChatMessage::user("hi")], &[], &|t: &str| {
                tokens.lock().unwrap().push(t.to_string())
            })
            .await
            .unwrap();

        assert_eq!(completion.message.content, "Hello, Vera");
        assert_eq!(*tokens.lock().unwrap(), vec!["Hello", ", Vera"]);
    }

    #[tokio::test]
    async fn test_error_status_maps_to_llm_error() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = spawn_stub(router).await;

        let model = OpenAiClient::new("sk-test", base)
            .unwrap()
            .chat_model("gpt-4o-mini", Duration::from_secs(5));
        let err = model.complete(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, AssistantError::Llm(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_embeddings_are_reordered_by_index() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async {
                Json(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }))
            }),
        );
        let base = spawn_stub(router).await;

        let embedder = OpenAiClient::new("sk-test", base).unwrap().embeddings("text-embedding-3-small");
        let vectors = embedder
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
