//! Knowledge base ingestion: load, split, index, expose a retriever

use super::documents::DOCUMENT_SOURCES;
use super::loader::{DocumentLoader, PdfLoader};
use super::retriever::KnowledgeRetriever;
use super::schemas::{DocumentChunk, DocumentSource, PipelineState, PipelineStatus};
use super::splitter::split_pages;
use super::vectorstore::{ChromaVectorStore, VectorStore};
use crate::config::Settings;
use crate::llm::Embedder;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info};

pub struct RagPipeline {
    store: Arc<dyn VectorStore>,
    loader: Arc<dyn DocumentLoader>,
    sources: Vec<DocumentSource>,
    default_k: usize,
    status: RwLock<PipelineStatus>,
    retriever: OnceCell<KnowledgeRetriever>,
}

impl RagPipeline {
    pub fn new(store: Arc<dyn VectorStore>, loader: Arc<dyn DocumentLoader>, default_k: usize) -> Self {
        Self {
            store,
            loader,
            sources: DOCUMENT_SOURCES.to_vec(),
            default_k,
            status: RwLock::new(PipelineStatus::default()),
            retriever: OnceCell::new(),
        }
    }

    /// Chroma-backed pipeline downloading the standard PDF sources.
    pub fn from_settings(settings: &Settings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store = ChromaVectorStore::new(&settings.chroma_url(), &settings.rag_collection_name, embedder)?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(PdfLoader::new()?),
            settings.rag_retrieval_k,
        ))
    }

    pub fn with_sources(mut self, sources: Vec<DocumentSource>) -> Self {
        self.sources = sources;
        self
    }

    pub async fn status(&self) -> PipelineStatus {
        self.status.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.status.read().await.status == PipelineState::Ready
    }

    /// Available once `initialize` has completed.
    pub fn retriever(&self) -> Option<KnowledgeRetriever> {
        self.retriever.get().cloned()
    }

    /// Reuse an already-populated collection, otherwise load and index every
    /// source. Individual document failures are recorded in the status;
    /// only vector store failures are returned.
    pub async fn initialize(&self) -> Result<()> {
        info!("RAG pipeline initialization");
        self.store.initialize().await?;

        if self.store.has_documents().await {
            let chunk_count = self.store.count().await?;
            *self.status.write().await = PipelineStatus {
                status: PipelineState::Ready,
                document_count: self.sources.len(),
                chunk_count,
                errors: Vec::new(),
            };
            self.publish_retriever();
            info!(chunk_count, "RAG pipeline ready (cached collection)");
            return Ok(());
        }

        self.status.write().await.status = PipelineState::Loading;

        let total = self.sources.len();
        let mut chunks: Vec<DocumentChunk> = Vec::new();
        let mut errors = Vec::new();
        let mut loaded = 0usize;

        for (i, source) in self.sources.iter().enumerate() {
            info!("[{}/{}] Loading: {}", i + 1, total, source.title);
            match self.loader.load(source).await {
                Ok(pages) => {
                    let document_chunks = split_pages(&pages, source);
                    info!(
                        "[{}/{}] {} - {} pages -> {} chunks",
                        i + 1,
                        total,
                        source.key,
                        pages.len(),
                        document_chunks.len()
                    );
                    chunks.extend(document_chunks);
                    loaded += 1;
                    self.status.write().await.document_count = loaded;
                }
                Err(e) => {
                    error!("[{}/{}] Failed: {}: {}", i + 1, total, source.key, e);
                    errors.push(format!("Failed to load {}: {}", source.key, e));
                }
            }
        }

        if !chunks.is_empty() {
            info!(chunks = chunks.len(), "Indexing chunks");
            self.store.add(&chunks).await?;
        }

        {
            let mut status = self.status.write().await;
            status.status = if errors.is_empty() {
                PipelineState::Ready
            } else {
                PipelineState::Partial
            };
            status.chunk_count = chunks.len();
            status.errors = errors;
            info!(
                status = ?status.status,
                documents = status.document_count,
                chunks = status.chunk_count,
                "RAG pipeline finished"
            );
        }

        self.publish_retriever();
        Ok(())
    }

    fn publish_retriever(&self) {
        let _ = self
            .retriever
            .set(KnowledgeRetriever::new(self.store.clone(), self.default_k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use crate::rag::schemas::PageText;
    use crate::rag::vectorstore::tests::KeywordEmbedder;
    use crate::rag::vectorstore::InMemoryVectorStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned pages; fails for the configured key.
    struct FakeLoader {
        fail_key: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DocumentLoader for FakeLoader {
        async fn load(&self, source: &DocumentSource) -> Result<Vec<PageText>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(source.key) == self.fail_key {
                return Err(AssistantError::DocumentDownload(format!(
                    "Failed to download {}: HTTP 500",
                    source.key
                )));
            }
            Ok(vec![
                PageText { page_number: 0, text: format!("Contenido de {}.", source.title) },
                PageText { page_number: 1, text: "Segunda página.".to_string() },
            ])
        }
    }

    fn pipeline(store: Arc<InMemoryVectorStore>, fail_key: Option<&'static str>) -> (RagPipeline, Arc<FakeLoader>) {
        let loader = Arc::new(FakeLoader { fail_key, calls: AtomicUsize::new(0) });
        (RagPipeline::new(store, loader.clone(), 4), loader)
    }

    #[tokio::test]
    async fn test_fresh_collection_is_loaded_and_ready() {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(KeywordEmbedder)));
        let (pipeline, _) = pipeline(store.clone(), None);
        assert!(pipeline.retriever().is_none());
        assert_eq!(pipeline.status().await.status, PipelineState::Initializing);

        pipeline.initialize().await.unwrap();

        let status = pipeline.status().await;
        assert_eq!(status.status, PipelineState::Ready);
        assert_eq!(status.document_count, 3);
        assert_eq!(status.chunk_count, 6);
        assert!(pipeline.is_ready().await);
        assert_eq!(store.count().await.unwrap(), 6);
        assert!(pipeline.retriever().is_some());
    }

    #[tokio::test]
    async fn test_failed_document_gives_partial_status() {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(KeywordEmbedder)));
        let (pipeline, _) = pipeline(store, Some("bank_regulation"));
        pipeline.initialize().await.unwrap();

        let status = pipeline.status().await;
        assert_eq!(status.status, PipelineState::Partial);
        assert_eq!(status.document_count, 2);
        assert_eq!(status.chunk_count, 4);
        assert_eq!(status.errors.len(), 1);
        assert!(status.errors[0].starts_with("Failed to load bank_regulation"));
        assert!(!pipeline.is_ready().await);
        assert!(pipeline.retriever().is_some());
    }

    #[tokio::test]
    async fn test_populated_collection_skips_loading() {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(KeywordEmbedder)));
        let (first, _) = pipeline(store.clone(), None);
        first.initialize().await.unwrap();

        let (second, loader) = pipeline(store, None);
        second.initialize().await.unwrap();

        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        let status = second.status().await;
        assert_eq!(status.status, PipelineState::Ready);
        assert_eq!(status.document_count, 3);
        assert_eq!(status.chunk_count, 6);
    }
}
