// Embeddings module
// Chunking policy plus the Ollama gateway for embeddings and answer generation

pub mod chunking;
pub mod ollama;


use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};

use crate::Result;

pub use chunking::{
    Chunk, ChunkMetadata, ChunkingConfig, chunk_document, estimate_token_count,
};
pub use ollama::{EMPTY_ANSWER_FALLBACK, OllamaClient, build_answer_prompt};

/// Turns text into fixed-length vectors through an external model service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Maximum number of embedding requests allowed in flight at once.
    /// The default of 1 keeps batches strictly sequential.
    #[inline]
    fn max_in_flight(&self) -> usize {
        1
    }

    /// Embed many texts, one vector per input in input order.
    ///
    /// Requests are issued through [`embed`](Self::embed) with at most
    /// [`max_in_flight`](Self::max_in_flight) outstanding. The first failure
    /// aborts the batch and is returned as-is; nothing is retried.
    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.max_in_flight().max(1);
        let requests: Vec<_> = texts.iter().map(|text| self.embed(text)).collect();
        stream::iter(requests).buffered(limit).try_collect().await
    }
}

/// Produces an answer to a question from retrieved context passages
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate_answer(&self, question: &str, passages: &[String]) -> Result<String>;
}
