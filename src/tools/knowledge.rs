//! Knowledge base search tool

use super::{Tool, TOOL_KNOWLEDGE};
use crate::logging::sanitize_for_log;
use crate::models::{ToolInput, ToolOutput};
use crate::rag::{DocumentType, KnowledgeRetriever, RetrievalResult};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

const QUERY_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub content: String,
    pub document_title: String,
    pub document_type: String,
    pub page_number: u32,
    pub relevance_score: f32,
}

impl From<RetrievalResult> for RetrievedChunk {
    fn from(result: RetrievalResult) -> Self {
        Self {
            content: result.content,
            document_title: result.metadata.document_title,
            document_type: result.metadata.document_type,
            page_number: result.metadata.page_number,
            relevance_score: result.relevance_score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeResults {
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
    pub total_results: usize,
}

pub struct KnowledgeTool {
    retriever: Option<KnowledgeRetriever>,
}

impl KnowledgeTool {
    /// `None` when the knowledge base could not be initialized.
    pub fn new(retriever: Option<KnowledgeRetriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait::async_trait]
impl Tool for KnowledgeTool {
    fn name(&self) -> &'static str {
        TOOL_KNOWLEDGE
    }

    fn description(&self) -> &'static str {
        "Search the VeraMoney knowledge base for information about company history, Uruguayan fintech regulation, and banking regulation. Returns relevant document chunks with source citations."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query to find relevant information in the knowledge base",
                    "minLength": 1,
                    "maxLength": QUERY_MAX_CHARS
                },
                "document_type": {
                    "type": "string",
                    "description": "Optional filter: vera_history, fintec_regulation, or bank_regulation"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let query = input.str_param("query").unwrap_or_default().trim();
        if query.is_empty() || query.chars().count() > QUERY_MAX_CHARS {
            return Ok(ToolOutput::error(format!(
                "Query must be between 1 and {} characters.",
                QUERY_MAX_CHARS
            )));
        }
        let document_type = input
            .str_param("document_type")
            .and_then(DocumentType::parse_filter);

        let Some(retriever) = &self.retriever else {
            return Ok(ToolOutput::error(
                "Knowledge base is not available. Please try again later.",
            ));
        };

        match retriever
            .search(query, document_type.map(|t| t.as_str()), Some(retriever.default_k()))
            .await
        {
            Ok(results) => {
                let chunks: Vec<RetrievedChunk> = results.into_iter().map(RetrievedChunk::from).collect();
                ToolOutput::json(&KnowledgeResults {
                    query: query.to_string(),
                    total_results: chunks.len(),
                    chunks,
                })
            }
            Err(e) => {
                error!(query = %sanitize_for_log(query), "Knowledge search failed: {}", e);
                Ok(ToolOutput::error(
                    "Failed to search the knowledge base. Please try again.",
                ))
            }
        }
    }
}
