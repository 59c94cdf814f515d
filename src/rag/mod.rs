//! Retrieval-augmented generation over the VeraMoney PDF documents

pub mod documents;
pub mod loader;
pub mod pipeline;
pub mod retriever;
pub mod schemas;
pub mod splitter;
pub mod vectorstore;

pub use documents::DOCUMENT_SOURCES;
pub use loader::{DocumentLoader, PdfLoader};
pub use pipeline::RagPipeline;
pub use retriever::KnowledgeRetriever;
pub use schemas::{
    ChunkMetadata, DocumentChunk, DocumentSource, DocumentType, PageText, PipelineState,
    PipelineStatus, RetrievalResult,
};
pub use vectorstore::{ChromaVectorStore, InMemoryVectorStore, VectorStore};
