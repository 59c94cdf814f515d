//! Similarity search with an optional document-type filter

use super::schemas::{DocumentType, RetrievalResult};
use super::vectorstore::VectorStore;
use crate::logging::sanitize_for_log;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct KnowledgeRetriever {
    store: Arc<dyn VectorStore>,
    default_k: usize,
}

impl KnowledgeRetriever {
    pub fn new(store: Arc<dyn VectorStore>, default_k: usize) -> Self {
        Self { store, default_k }
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Search the knowledge base. An unknown `document_type` is ignored; a
    /// filtered search with no hits is retried without the filter.
    pub async fn search(
        &self,
        query: &str,
        document_type: Option<&str>,
        k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>> {
        let k = k.unwrap_or(self.default_k);
        let filter = document_type.and_then(|raw| {
            let parsed = DocumentType::parse_filter(raw);
            if parsed.is_none() {
                warn!(document_type = raw, "Ignoring unknown document type filter");
            }
            parsed
        });

        let mut results = self.store.similarity_search(query, k, filter).await?;

        if results.is_empty() && filter.is_some() {
            info!(
                query = %sanitize_for_log(query),
                document_type = ?filter,
                "No filtered results, retrying without filter"
            );
            results = self.store.similarity_search(query, k, None).await?;
        }

        info!(
            query = %sanitize_for_log(query),
            document_type = ?filter,
            k,
            results = results.len(),
            "Knowledge search"
        );
        Ok(results)
    }
}
