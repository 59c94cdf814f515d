//! LLM access: chat completions with function calling, and embeddings
//!
//! The agent depends only on the `ChatModel` / `Embedder` traits so tests
//! can script model behaviour without a network.

pub mod openai;
pub mod stream;

pub use openai::{OpenAiChatModel, OpenAiClient, OpenAiEmbeddings};

use crate::models::ChatMessage;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One model turn: an assistant message, possibly carrying tool calls.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: ChatMessage,
    pub usage: Option<TokenUsage>,
}

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion>;

    /// Same as `complete`, forwarding content deltas to `on_token` as they arrive.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        on_token: &(dyn for<'t> Fn(&'t str) + Send + Sync),
    ) -> Result<Completion> {
        let completion = self.complete(messages, tools).await?;
        if !completion.message.content.is_empty() {
            on_token(&completion.message.content);
        }
        Ok(completion)
    }
}

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::error::AssistantError::Llm("Empty embedding response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_default_streaming_forwards_whole_content() {
        let model = ScriptedModel::new(vec![ChatMessage::assistant("Hola!"), ChatMessage::assistant("")]);
        let tokens = Mutex::new(Vec::new());
        let on_token = |token: &str| tokens.lock().unwrap().push(token.to_string());

        let completion = model
            .complete_streaming(&[ChatMessage::user("hi")], &[], &on_token)
            .await
            .unwrap();
        assert_eq!(completion.message.content, "Hola!");

        // empty content emits nothing
        model
            .complete_streaming(&[ChatMessage::user("hi")], &[], &on_token)
            .await
            .unwrap();
        assert_eq!(*tokens.lock().unwrap(), vec!["Hola!".to_string()]);
    }
}
