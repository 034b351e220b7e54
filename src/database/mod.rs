// Database module
// Embedding-indexed chunk storage behind a single trait, with a JSON file
// backend and an embedded LanceDB backend


pub mod json;
pub mod lancedb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::Result;
use crate::config::{Config, StorageBackend};
use crate::embeddings::{Chunk, ChunkMetadata, EmbeddingProvider};

pub use json::JsonVectorStore;
pub use lancedb::LanceVectorStore;

/// Number of results returned by a search when the caller has no preference
pub const DEFAULT_TOP_K: usize = 5;

/// A chunk together with its embedding, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl StoredRecord {
    #[inline]
    pub fn from_chunk(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            text: chunk.text,
            embedding,
            metadata: chunk.metadata,
        }
    }
}

/// A ranked match; `score` is cosine similarity, higher is better
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and append chunks. Either every chunk is stored or none is.
    async fn insert(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// The `top_k` records most similar to `query`, best first.
    /// An empty store answers `[]` without calling the embedder.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>>;

    /// Distinct documents in first-seen order
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Remove every record of `document_id`, returning how many went away
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

/// Cosine similarity of two vectors.
///
/// Mismatched lengths, empty input and zero-magnitude vectors all score 0.0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0_f64, 0.0_f64, 0.0_f64),
        |(dot, norm_a, norm_b), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (x.mul_add(y, dot), x.mul_add(x, norm_a), y.mul_add(y, norm_b))
        },
    );

    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 || !magnitude.is_finite() {
        return 0.0;
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "similarity is within [-1, 1]"
    )]
    let similarity = (dot / magnitude) as f32;
    similarity
}

/// Open the backend selected in `config`, sharing `embedder` with it
#[inline]
pub async fn open_store(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorStore>> {
    info!("Opening {} vector store", config.storage.backend);

    let store: Arc<dyn VectorStore> = match config.storage.backend {
        StorageBackend::Json => {
            Arc::new(JsonVectorStore::open(config.vector_store_path(), embedder).await?)
        }
        StorageBackend::Lancedb => {
            Arc::new(LanceVectorStore::open(config.lance_path(), embedder).await?)
        }
    };

    Ok(store)
}
