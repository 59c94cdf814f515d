//! Evaluation datasets fed from live traffic

use super::manager::LangfuseManager;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub const USER_OPENING_MESSAGES: &str = "USER_OPENING_MESSAGES";
pub const STOCK_QUERIES: &str = "STOCK_QUERIES";

const DATASETS: [(&str, &str); 2] = [
    (
        USER_OPENING_MESSAGES,
        "Tracks initial user messages with expected tool usage for evaluation",
    ),
    (
        STOCK_QUERIES,
        "Tracks stock price queries with ticker information for evaluation",
    ),
];

fn description(name: &str) -> &'static str {
    DATASETS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, d)| *d)
        .unwrap_or_default()
}

/// All operations are no-ops while Langfuse is disabled, and never fail.
pub struct DatasetManager {
    langfuse: Arc<LangfuseManager>,
}

impl DatasetManager {
    pub fn new(langfuse: Arc<LangfuseManager>) -> Self {
        Self { langfuse }
    }

    /// Pre-create both datasets.
    pub async fn initialize(&self) {
        let Some(client) = self.langfuse.client() else {
            return;
        };

        let results = futures::future::join_all(
            DATASETS
                .iter()
                .map(|(name, description)| client.create_dataset(name, description)),
        )
        .await;

        match results.into_iter().find_map(|r| r.err()) {
            None => info!(datasets = ?DATASETS.map(|(n, _)| n), "Datasets initialized"),
            Some(e) => warn!("Failed to pre-create datasets: {}", e),
        }
    }

    pub async fn add_opening_message(&self, message: &str, session_id: &str, expected_tools: &[String], model: &str) {
        let Some(client) = self.langfuse.client() else {
            return;
        };

        let result = async {
            client
                .create_dataset(USER_OPENING_MESSAGES, description(USER_OPENING_MESSAGES))
                .await?;
            client
                .create_dataset_item(
                    USER_OPENING_MESSAGES,
                    json!({ "message": message, "session_id": session_id }),
                    json!({
                        "timestamp": Utc::now().to_rfc3339(),
                        "model": model,
                        "expected_tools": expected_tools,
                    }),
                )
                .await
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to add opening message to dataset: {}", e);
        }
    }

    pub async fn add_stock_query(&self, ticker: &str, message: &str, session_id: &str) {
        let Some(client) = self.langfuse.client() else {
            return;
        };

        let result = async {
            client
                .create_dataset(STOCK_QUERIES, description(STOCK_QUERIES))
                .await?;
            client
                .create_dataset_item(
                    STOCK_QUERIES,
                    json!({ "query": message, "ticker": ticker }),
                    json!({
                        "timestamp": Utc::now().to_rfc3339(),
                        "session_id": session_id,
                    }),
                )
                .await
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to add stock query to dataset: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::settings_from;
    use crate::retry::RetryPolicy;
    use crate::test_support::spawn_stub;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::Mutex;

    async fn enabled_manager(items: Arc<Mutex<Vec<Value>>>) -> Arc<LangfuseManager> {
        let app = Router::new()
            .route("/api/public/projects", get(|| async { StatusCode::OK }))
            .route("/api/public/v2/datasets", post(|| async { StatusCode::OK }))
            .route(
                "/api/public/dataset-items",
                post(move |Json(body): Json<Value>| {
                    let items = items.clone();
                    async move {
                        items.lock().await.push(body);
                        StatusCode::OK
                    }
                }),
            );
        let base = spawn_stub(app).await;
        let settings = settings_from(&[
            ("API_KEY", "k"),
            ("OPENAI_API_KEY", "sk"),
            ("LANGFUSE_PUBLIC_KEY", "pk"),
            ("LANGFUSE_SECRET_KEY", "sk"),
            ("LANGFUSE_HOST", base.as_str()),
        ])
        .unwrap();
        let manager = LangfuseManager::new(&settings).with_retry(RetryPolicy::fixed(1, Duration::from_millis(1)));
        assert!(manager.initialize().await);
        Arc::new(manager)
    }

    #[tokio::test]
    async fn test_items_have_expected_shape() {
        let items = Arc::new(Mutex::new(Vec::new()));
        let datasets = DatasetManager::new(enabled_manager(items.clone()).await);
        datasets.initialize().await;

        datasets
            .add_opening_message("Clima en Montevideo?", "s-1", &["weather".to_string()], "gpt-4o-mini")
            .await;
        datasets.add_stock_query("AAPL", "AAPL price?", "s-1").await;

        let items = items.lock().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["datasetName"], USER_OPENING_MESSAGES);
        assert_eq!(items[0]["input"]["message"], "Clima en Montevideo?");
        assert_eq!(items[0]["metadata"]["expected_tools"][0], "weather");
        assert_eq!(items[1]["datasetName"], STOCK_QUERIES);
        assert_eq!(items[1]["input"]["ticker"], "AAPL");
        assert_eq!(items[1]["metadata"]["session_id"], "s-1");
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let datasets = DatasetManager::new(Arc::new(LangfuseManager::disabled("development")));
        datasets.initialize().await;
        datasets.add_stock_query("AAPL", "AAPL?", "s").await;
        assert_eq!(
            description(STOCK_QUERIES),
            "Tracks stock price queries with ticker information for evaluation"
        );
    }
}
