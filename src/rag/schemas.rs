//! Knowledge base records: sources, chunks, search results, pipeline status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    VeraHistory,
    FintecRegulation,
    BankRegulation,
}

impl DocumentType {
    pub const ALL: [DocumentType; 3] = [
        DocumentType::VeraHistory,
        DocumentType::FintecRegulation,
        DocumentType::BankRegulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::VeraHistory => "vera_history",
            DocumentType::FintecRegulation => "fintec_regulation",
            DocumentType::BankRegulation => "bank_regulation",
        }
    }

    /// Lenient parse used for model-supplied filters: trims and lowercases,
    /// unknown values yield `None`.
    pub fn parse_filter(raw: &str) -> Option<Self> {
        raw.trim().to_lowercase().parse().ok()
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown document type '{}'", s))
    }
}

/// A PDF the knowledge base is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSource {
    pub key: &'static str,
    pub url: &'static str,
    pub document_type: DocumentType,
    pub title: &'static str,
    pub language: &'static str,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub document_type: String,
    pub source_url: String,
    pub document_title: String,
    pub language: String,
    pub page_number: u32,
    pub chunk_index: u32,
}

impl ChunkMetadata {
    pub fn for_source(source: &DocumentSource, page_number: u32, chunk_index: u32) -> Self {
        Self {
            document_type: source.document_type.as_str().to_string(),
            source_url: source.url.to_string(),
            document_title: source.title.to_string(),
            language: source.language.to_string(),
            page_number,
            chunk_index,
        }
    }
}

/// Extracted text of one PDF page (0-based page number).
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Initializing,
    Loading,
    Ready,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStatus {
    pub status: PipelineState,
    pub document_count: usize,
    pub chunk_count: usize,
    pub errors: Vec<String>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            status: PipelineState::Initializing,
            document_count: 0,
            chunk_count: 0,
            errors: Vec::new(),
        }
    }
}
