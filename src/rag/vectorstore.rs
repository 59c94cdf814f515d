//! Vector stores for knowledge chunks
//!
//! `ChromaVectorStore` talks to a Chroma server over its v1 HTTP API;
//! `InMemoryVectorStore` keeps embeddings in process and is used when no
//! external store is wanted (tests, local runs).

use super::schemas::{ChunkMetadata, DocumentChunk, DocumentType, RetrievalResult};
use crate::error::AssistantError;
use crate::llm::Embedder;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

pub const EMBEDDING_BATCH_SIZE: usize = 100;

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare the backing collection. Safe to call more than once.
    async fn initialize(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    async fn has_documents(&self) -> bool {
        matches!(self.count().await, Ok(n) if n > 0)
    }

    /// Embed and store chunks. Returns how many were stored.
    async fn add(&self, chunks: &[DocumentChunk]) -> Result<usize>;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<DocumentType>,
    ) -> Result<Vec<RetrievalResult>>;
}

/// Stable id so re-indexing a document overwrites its chunks.
pub fn chunk_id(metadata: &ChunkMetadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(metadata.source_url.as_bytes());
    hasher.update(b":");
    hasher.update(metadata.page_number.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(metadata.chunk_index.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

async fn embed_in_batches(embedder: &dyn Embedder, chunks: &[DocumentChunk]) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for (i, batch) in chunks.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let embedded = embedder.embed(&texts).await?;
        if embedded.len() != batch.len() {
            return Err(AssistantError::VectorStore(format!(
                "Embedder returned {} vectors for {} chunks",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);
        info!(
            batch_start = i * EMBEDDING_BATCH_SIZE,
            batch_end = i * EMBEDDING_BATCH_SIZE + batch.len(),
            total = chunks.len(),
            "Embedding batch complete"
        );
    }
    Ok(vectors)
}

// =============================
// Chroma
// =============================

pub struct ChromaVectorStore {
    client: Client,
    base_url: String,
    collection_name: String,
    collection_id: OnceCell<String>,
    embedder: Arc<dyn Embedder>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<&'a str>,
    metadatas: Vec<&'a ChunkMetadata>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Vec<Vec<Option<ChunkMetadata>>>,
    #[serde(default)]
    distances: Vec<Vec<Option<f32>>>,
}

impl ChromaVectorStore {
    pub fn new(base_url: &str, collection_name: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_name: collection_name.to_string(),
            collection_id: OnceCell::new(),
            embedder,
        })
    }

    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/collections", self.base_url);
                let body = json!({
                    "name": self.collection_name,
                    "metadata": { "hnsw:space": "cosine" },
                    "get_or_create": true,
                });
                let info: CollectionInfo = self.send(self.client.post(&url).json(&body)).await?;
                info!(collection = %self.collection_name, id = %info.id, "Chroma collection ready");
                Ok::<_, AssistantError>(info.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| AssistantError::VectorStore(format!("Chroma unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::VectorStore(format!(
                "Chroma returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl VectorStore for ChromaVectorStore {
    async fn initialize(&self) -> Result<()> {
        self.collection_id().await.map(|_| ())
    }

    async fn count(&self) -> Result<usize> {
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/count", self.base_url, id);
        let count: usize = self.send(self.client.get(&url)).await?;
        debug!(collection = %self.collection_name, count, "Chroma count");
        Ok(count)
    }

    async fn add(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/upsert", self.base_url, id);
        let vectors = embed_in_batches(self.embedder.as_ref(), chunks).await?;

        for (batch, embeddings) in chunks
            .chunks(EMBEDDING_BATCH_SIZE)
            .zip(vectors.chunks(EMBEDDING_BATCH_SIZE))
        {
            let request = UpsertRequest {
                ids: batch.iter().map(|c| chunk_id(&c.metadata)).collect(),
                embeddings: embeddings.to_vec(),
                documents: batch.iter().map(|c| c.content.as_str()).collect(),
                metadatas: batch.iter().map(|c| &c.metadata).collect(),
            };
            let _: Value = self.send(self.client.post(&url).json(&request)).await?;
        }

        info!(total_chunks = chunks.len(), "Chunks indexed in Chroma");
        Ok(chunks.len())
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<DocumentType>,
    ) -> Result<Vec<RetrievalResult>> {
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/query", self.base_url, id);
        let embedding = self.embedder.embed_one(query).await?;

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(document_type) = filter {
            body["where"] = json!({ "document_type": document_type.as_str() });
        }

        let response: QueryResponse = self.send(self.client.post(&url).json(&body)).await?;
        let results = zip_query_results(response);

        info!(query_length = query.len(), k, results = results.len(), "Chroma search");
        Ok(results)
    }
}

fn zip_query_results(response: QueryResponse) -> Vec<RetrievalResult> {
    let documents = response.documents.into_iter().next().unwrap_or_default();
    let metadatas = response.metadatas.into_iter().next().unwrap_or_default();
    let distances = response.distances.into_iter().next().unwrap_or_default();

    documents
        .into_iter()
        .zip(metadatas)
        .zip(distances)
        .filter_map(|((content, metadata), distance)| {
            Some(RetrievalResult {
                content: content?,
                metadata: metadata?,
                relevance_score: 1.0 - distance.unwrap_or(1.0),
            })
        })
        .collect()
}

// =============================
// In-memory
// =============================

pub struct InMemoryVectorStore {
    entries: RwLock<Vec<(DocumentChunk, Vec<f32>)>>,
    embedder: Arc<dyn Embedder>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            embedder,
        }
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn add(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let vectors = embed_in_batches(self.embedder.as_ref(), chunks).await?;
        let mut entries = self.entries.write().await;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let id = chunk_id(&chunk.metadata);
            match entries.iter_mut().find(|(c, _)| chunk_id(&c.metadata) == id) {
                Some(existing) => *existing = (chunk.clone(), vector),
                None => entries.push((chunk.clone(), vector)),
            }
        }
        Ok(chunks.len())
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<DocumentType>,
    ) -> Result<Vec<RetrievalResult>> {
        let query_vector = self.embedder.embed_one(query).await?;
        let entries = self.entries.read().await;

        let mut scored: Vec<RetrievalResult> = entries
            .iter()
            .filter(|(chunk, _)| match filter {
                Some(t) => chunk.metadata.document_type == t.as_str(),
                None => true,
            })
            .map(|(chunk, vector)| RetrievalResult {
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                relevance_score: cosine_similarity(&query_vector, vector),
            })
            .collect();

        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rag::documents::DOCUMENT_SOURCES;
    use crate::test_support::spawn_stub;
    use axum::extract::Path;
    use axum::{routing::{get, post}, Json, Router};

    /// Deterministic embedder: counts a few keywords.
    pub(crate) struct KeywordEmbedder;

    #[async_trait::async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["historia", "fintech", "banco", "regulación"]
                        .iter()
                        .map(|k| t.matches(k).count() as f32 + 0.01)
                        .collect()
                })
                .collect())
        }
    }

    pub(crate) fn chunk(source_idx: usize, page: u32, index: u32, content: &str) -> DocumentChunk {
        DocumentChunk {
            content: content.to_string(),
            metadata: ChunkMetadata::for_source(&DOCUMENT_SOURCES[source_idx], page, index),
        }
    }

    #[test]
    fn test_chunk_id_is_stable_and_distinct() {
        let a = chunk(0, 1, 0, "x").metadata;
        let b = chunk(0, 1, 1, "x").metadata;
        assert_eq!(chunk_id(&a), chunk_id(&a.clone()));
        assert_ne!(chunk_id(&a), chunk_id(&b));
        assert_eq!(chunk_id(&a).len(), 64);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_in_memory_search_ranks_and_filters() {
        let store = InMemoryVectorStore::new(Arc::new(KeywordEmbedder));
        assert!(!store.has_documents().await);

        store
            .add(&[
                chunk(0, 0, 0, "La historia de VeraMoney empieza en 2015"),
                chunk(1, 0, 0, "Regulación fintech en Uruguay"),
                chunk(2, 0, 0, "El banco central y la regulación bancaria"),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let results = store.similarity_search("historia", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.document_type, "vera_history");

        let filtered = store
            .similarity_search("historia", 4, Some(DocumentType::BankRegulation))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].metadata.document_title, "Regulacion Bancaria Uruguaya");
    }

    #[tokio::test]
    async fn test_in_memory_add_is_idempotent_per_chunk() {
        let store = InMemoryVectorStore::new(Arc::new(KeywordEmbedder));
        store.add(&[chunk(0, 0, 0, "v1")]).await.unwrap();
        store.add(&[chunk(0, 0, 0, "v2")]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_chroma_query_maps_distance_to_relevance() {
        let metadata = serde_json::to_value(chunk(1, 3, 7, "").metadata).unwrap();
        let router = Router::new()
            .route(
                "/api/v1/collections",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["metadata"]["hnsw:space"], "cosine");
                    Json(json!({ "id": "col-1", "name": body["name"] }))
                }),
            )
            .route("/api/v1/collections/:id/count", get(|| async { Json(json!(12)) }))
            .route(
                "/api/v1/collections/:id/query",
                post(move |Path(id): Path<String>, Json(body): Json<Value>| {
                    let metadata = metadata.clone();
                    async move {
                        assert_eq!(id, "col-1");
                        assert_eq!(body["where"]["document_type"], "fintec_regulation");
                        assert_eq!(body["n_results"], 2);
                        Json(json!({
                            "ids": [["a"]],
                            "documents": [["Texto regulatorio"]],
                            "metadatas": [[metadata]],
                            "distances": [[0.25]]
                        }))
                    }
                }),
            );
        let base = spawn_stub(router).await;

        let store = ChromaVectorStore::new(&base, "veramoney_knowledge", Arc::new(KeywordEmbedder)).unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 12);
        assert!(store.has_documents().await);

        let results = store
            .similarity_search("fintech", 2, Some(DocumentType::FintecRegulation))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "Texto regulatorio");
        assert_eq!(results[0].metadata.page_number, 3);
        assert!((results[0].relevance_score - 0.75).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_chroma_unreachable_is_a_vector_store_error() {
        let store = ChromaVectorStore::new("http://127.0.0.1:9", "c", Arc::new(KeywordEmbedder)).unwrap();
        assert!(matches!(store.initialize().await, Err(AssistantError::VectorStore(_))));
        assert!(!store.has_documents().await);
    }
}
