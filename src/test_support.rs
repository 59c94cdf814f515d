//! Shared helpers for unit tests

use crate::error::AssistantError;
use crate::llm::{ChatModel, Completion, TokenUsage, ToolDefinition};
use crate::models::{ChatMessage, ToolCall};
use crate::Result;
use axum::Router;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });
    format!("http://{}", addr)
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Chat model that replies with a fixed script and records every request.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolDefinition]) -> Result<Completion> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AssistantError::Llm("script exhausted".to_string()))?;
        Ok(Completion {
            message,
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}
