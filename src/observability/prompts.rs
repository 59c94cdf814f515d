//! Prompt management backed by Langfuse
//!
//! The built-in templates are pushed to Langfuse at startup and fetched
//! back per request, so prompts can be edited there without a redeploy.
//! Any Langfuse failure falls back to the built-in text.

use super::client::{CreatePrompt, LangfuseClient, RemotePrompt, PRODUCTION_LABEL};
use super::manager::LangfuseManager;
use crate::agent::prompts::{compile, format_prompt_date, AGENT_VERSION, SUPERVISOR_PROMPT};
use crate::agent::workers::WorkerKind;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const PROMPT_NAME_SUPERVISOR: &str = "vera-supervisor-prompt";

const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptSource {
    Fallback,
    Langfuse,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromptMetadata {
    pub prompt_source: PromptSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<u32>,
}

impl PromptMetadata {
    fn fallback() -> Self {
        Self {
            prompt_source: PromptSource::Fallback,
            prompt_name: None,
            prompt_version: None,
        }
    }

    fn langfuse(prompt: &RemotePrompt) -> Self {
        Self {
            prompt_source: PromptSource::Langfuse,
            prompt_name: Some(prompt.name.clone()),
            prompt_version: Some(prompt.version),
        }
    }
}

pub struct PromptManager {
    langfuse: Arc<LangfuseManager>,
    agent_model: String,
    cache: RwLock<HashMap<String, (Instant, RemotePrompt)>>,
}

impl PromptManager {
    pub fn new(langfuse: Arc<LangfuseManager>, agent_model: impl Into<String>) -> Self {
        Self {
            langfuse,
            agent_model: agent_model.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Create or update the Langfuse copies of every built-in prompt.
    pub async fn sync_to_langfuse(&self) {
        let Some(client) = self.langfuse.client() else {
            return;
        };

        let supervisor_messages = json!([
            { "role": "system", "content": SUPERVISOR_PROMPT },
            { "type": "placeholder", "name": "chat_history" },
            { "role": "user", "content": "{{user_message}}" }
        ]);
        sync_prompt(client, PROMPT_NAME_SUPERVISOR, "chat", SUPERVISOR_PROMPT, supervisor_messages).await;

        for worker in WorkerKind::ALL {
            let template = worker.fallback_prompt();
            sync_prompt(client, worker.prompt_name(), "text", template, json!(template)).await;
        }
    }

    /// Compiled supervisor system prompt and where it came from.
    pub async fn supervisor_prompt(&self) -> (String, PromptMetadata) {
        let (template, metadata) = self.resolve(PROMPT_NAME_SUPERVISOR, SUPERVISOR_PROMPT).await;
        let date = format_prompt_date(Utc::now());
        let compiled = compile(
            &template,
            &[
                ("current_date", date.as_str()),
                ("model_name", self.agent_model.as_str()),
                ("version", AGENT_VERSION),
            ],
        );
        (compiled, metadata)
    }

    pub async fn worker_prompt(&self, worker: WorkerKind) -> (String, PromptMetadata) {
        let (template, metadata) = self.resolve(worker.prompt_name(), worker.fallback_prompt()).await;
        let date = format_prompt_date(Utc::now());
        (compile(&template, &[("current_date", date.as_str())]), metadata)
    }

    async fn resolve(&self, name: &str, fallback: &str) -> (String, PromptMetadata) {
        let Some(client) = self.langfuse.client() else {
            return (fallback.to_string(), PromptMetadata::fallback());
        };

        match self.fetch_cached(client, name).await {
            Ok(Some(prompt)) => match prompt.system_text() {
                Some(text) => (text.to_string(), PromptMetadata::langfuse(&prompt)),
                None => {
                    warn!(prompt = name, "Langfuse prompt has no usable text, using fallback");
                    (fallback.to_string(), PromptMetadata::fallback())
                }
            },
            Ok(None) => {
                warn!(prompt = name, "Prompt not found in Langfuse, using fallback");
                (fallback.to_string(), PromptMetadata::fallback())
            }
            Err(e) => {
                warn!(prompt = name, "Failed to fetch prompt from Langfuse, using fallback: {}", e);
                (fallback.to_string(), PromptMetadata::fallback())
            }
        }
    }

    async fn fetch_cached(&self, client: &LangfuseClient, name: &str) -> Result<Option<RemotePrompt>> {
        if let Some((fetched_at, prompt)) = self.cache.read().await.get(name) {
            if fetched_at.elapsed() < CACHE_TTL {
                return Ok(Some(prompt.clone()));
            }
        }

        let prompt = client.get_prompt(name, PRODUCTION_LABEL).await?;
        if let Some(prompt) = &prompt {
            self.cache
                .write()
                .await
                .insert(name.to_string(), (Instant::now(), prompt.clone()));
        }
        Ok(prompt)
    }
}

async fn sync_prompt(client: &LangfuseClient, name: &str, kind: &str, expected_text: &str, body: serde_json::Value) {
    let existing = match client.get_prompt(name, PRODUCTION_LABEL).await {
        Ok(prompt) => prompt,
        Err(e) => {
            warn!(prompt = name, "Could not read prompt from Langfuse: {}", e);
            None
        }
    };

    if existing.as_ref().and_then(RemotePrompt::system_text) == Some(expected_text) {
        info!(prompt = name, "Prompt already in sync");
        return;
    }

    let request = CreatePrompt {
        name,
        kind,
        prompt: body,
        labels: vec![PRODUCTION_LABEL],
    };
    match client.create_prompt(&request).await {
        Ok(created) => {
            let action = if existing.is_some() { "Updated" } else { "Created" };
            info!(prompt = name, version = created.version, "{} {} prompt in Langfuse", action, kind);
        }
        Err(e) => warn!(prompt = name, "Failed to sync prompt to Langfuse: {}", e),
    }
}
