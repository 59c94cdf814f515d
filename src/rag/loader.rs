//! PDF download and per-page text extraction

use super::schemas::{DocumentSource, PageText};
use crate::error::AssistantError;
use crate::retry::RetryPolicy;
use crate::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));

#[async_trait::async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Fetch a source and return its non-empty pages.
    async fn load(&self, source: &DocumentSource) -> Result<Vec<PageText>>;
}

pub struct PdfLoader {
    client: Client,
    retry: RetryPolicy,
}

impl PdfLoader {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
        Ok(Self {
            client,
            retry: DOWNLOAD_RETRY,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, reqwest::Error> {
        self.retry
            .run("pdf-download", |_: &reqwest::Error| true, || async move {
                let response = self.client.get(url).send().await?.error_for_status()?;
                Ok::<_, reqwest::Error>(response.bytes().await?.to_vec())
            })
            .await
    }
}

#[async_trait::async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, source: &DocumentSource) -> Result<Vec<PageText>> {
        info!(document = source.key, url = source.url, "Downloading document");

        let bytes = self.download(source.url).await.map_err(|e| {
            error!(document = source.key, "Download failed: {}", e);
            let cause = match e.status() {
                Some(status) => format!("HTTP {}", status.as_u16()),
                None if e.is_timeout() => "timeout".to_string(),
                None => e.to_string(),
            };
            AssistantError::DocumentDownload(format!("Failed to download {}: {}", source.key, cause))
        })?;

        let pages = tokio::task::spawn_blocking(move || extract_pages(&bytes))
            .await
            .map_err(|e| AssistantError::DocumentDownload(format!("Failed to load {}: {}", source.key, e)))?
            .map_err(|e| AssistantError::DocumentDownload(format!("Failed to load {}: {}", source.key, e)))?;

        info!(document = source.key, pages = pages.len(), "Document loaded");
        Ok(pages)
    }
}

fn extract_pages(bytes: &[u8]) -> std::result::Result<Vec<PageText>, pdf_extract::OutputError> {
    let texts = pdf_extract::extract_text_from_mem_by_pages(bytes)?;
    Ok(non_empty_pages(texts))
}

fn non_empty_pages(texts: Vec<String>) -> Vec<PageText> {
    texts
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| PageText {
            page_number: i as u32,
            text,
        })
        .collect()
}
