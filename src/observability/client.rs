//! Langfuse public REST API client
//!
//! Basic auth with the project's public key as user and secret key as
//! password. Only the endpoints the service needs are covered.

use crate::error::AssistantError;
use crate::Result;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const PRODUCTION_LABEL: &str = "production";

/// Outcome of the credentials check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCheck {
    Authorized,
    Unauthorized,
    Unexpected(StatusCode),
}

/// A prompt version as stored in Langfuse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemotePrompt {
    pub name: String,
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    /// A string for text prompts, an array of messages for chat prompts.
    pub prompt: Value,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl RemotePrompt {
    /// The text of a text prompt, or the system message of a chat prompt.
    pub fn system_text(&self) -> Option<&str> {
        match &self.prompt {
            Value::String(text) => Some(text),
            Value::Array(messages) => messages
                .iter()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("system"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePrompt<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub prompt: Value,
    pub labels: Vec<&'a str>,
}

#[derive(Clone)]
pub struct LangfuseClient {
    client: Client,
    host: String,
    public_key: String,
    secret_key: String,
}

impl LangfuseClient {
    pub fn new(host: &str, public_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            public_key: public_key.into(),
            secret_key: secret_key.into(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// First characters of the public key, for logs.
    pub fn public_key_prefix(&self) -> String {
        let prefix: String = self.public_key.chars().take(10).collect();
        format!("{}...", prefix)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.host, path))
            .basic_auth(&self.public_key, Some(&self.secret_key))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.host, path))
            .basic_auth(&self.public_key, Some(&self.secret_key))
    }

    /// Transport errors are returned as-is so callers can retry them.
    pub async fn check_auth(&self) -> std::result::Result<AuthCheck, reqwest::Error> {
        let status = self.get("/api/public/projects").send().await?.status();
        Ok(match status {
            StatusCode::OK => AuthCheck::Authorized,
            StatusCode::UNAUTHORIZED => AuthCheck::Unauthorized,
            other => AuthCheck::Unexpected(other),
        })
    }

    /// Send a batch of ingestion events (trace-create, generation-create, span-create).
    pub async fn ingest(&self, batch: &[Value]) -> Result<()> {
        let response = self
            .post("/api/public/ingestion")
            .json(&json!({ "batch": batch }))
            .send()
            .await?;
        expect_success(response.status(), "ingestion")?;
        debug!(events = batch.len(), "Langfuse batch ingested");
        Ok(())
    }

    /// Create a dataset. Langfuse treats an existing name as a no-op upsert.
    pub async fn create_dataset(&self, name: &str, description: &str) -> Result<()> {
        let response = self
            .post("/api/public/v2/datasets")
            .json(&json!({ "name": name, "description": description }))
            .send()
            .await?;
        expect_success(response.status(), "create dataset")
    }

    pub async fn create_dataset_item(&self, dataset: &str, input: Value, metadata: Value) -> Result<()> {
        let response = self
            .post("/api/public/dataset-items")
            .json(&json!({
                "datasetName": dataset,
                "input": input,
                "expectedOutput": null,
                "metadata": metadata,
            }))
            .send()
            .await?;
        expect_success(response.status(), "create dataset item")
    }

    /// The prompt version carrying `label`, or `None` when it does not exist.
    pub async fn get_prompt(&self, name: &str, label: &str) -> Result<Option<RemotePrompt>> {
        let response = self
            .get(&format!("/api/public/v2/prompts/{}", name))
            .query(&[("label", label)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        expect_success(response.status(), "get prompt")?;
        Ok(Some(response.json().await?))
    }

    pub async fn create_prompt(&self, prompt: &CreatePrompt<'_>) -> Result<RemotePrompt> {
        let response = self.post("/api/public/v2/prompts").json(prompt).send().await?;
        expect_success(response.status(), "create prompt")?;
        Ok(response.json().await?)
    }
}

fn expect_success(status: StatusCode, operation: &str) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AssistantError::Observability(format!(
            "Langfuse {} returned {}",
            operation, status
        )))
    }
}
