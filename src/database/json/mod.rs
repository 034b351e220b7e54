// JSON-file vector store
// The whole collection lives in memory and is rewritten to one file after
// every mutation; search is a linear cosine scan


use async_trait::async_trait;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{DocumentSummary, SearchResult, StoredRecord, VectorStore, cosine_similarity};
use crate::embeddings::{Chunk, EmbeddingProvider};
use crate::{RagError, Result};

pub struct JsonVectorStore {
    path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    records: RwLock<Vec<StoredRecord>>,
}

impl JsonVectorStore {
    /// Load the collection stored at `path`.
    ///
    /// A missing file is an empty collection. A file that cannot be read or
    /// parsed is an error; it is never replaced silently.
    #[inline]
    pub async fn open<P: AsRef<Path>>(
        path: P,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<StoredRecord>>(&bytes).map_err(|e| {
                RagError::Persistence(format!(
                    "Vector store at {} is corrupt: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No vector store at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => {
                return Err(RagError::Persistence(format!(
                    "Failed to read vector store at {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        info!(
            "Loaded {} records from vector store at {}",
            records.len(),
            path.display()
        );

        Ok(Self {
            path,
            embedder,
            records: RwLock::new(records),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `records` to a sibling temp file, then rename it over the artifact
    async fn persist(&self, records: &[StoredRecord]) -> Result<()> {
        let persistence_error = |action: &str, e: &dyn std::fmt::Display| {
            RagError::Persistence(format!(
                "Failed to {} vector store at {}: {}",
                action,
                self.path.display(),
                e
            ))
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error("create directory for", &e))?;
        }

        let bytes = serde_json::to_vec(records).map_err(|e| persistence_error("serialize", &e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| persistence_error("write", &e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| persistence_error("replace", &e))?;

        debug!(
            "Persisted {} records ({} bytes) to {}",
            records.len(),
            bytes.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl VectorStore for JsonVectorStore {
    async fn insert(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, received {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let new_records: Vec<StoredRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| StoredRecord::from_chunk(chunk, embedding))
            .collect();
        let added = new_records.len();

        let mut records = self.records.write().await;
        let previous_len = records.len();
        records.extend(new_records);

        if let Err(e) = self.persist(&records).await {
            warn!("Rolling back insert of {} records: {}", added, e);
            records.truncate(previous_len);
            return Err(e);
        }

        info!("Stored {} records ({} total)", added, records.len());
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 || self.records.read().await.is_empty() {
            debug!("Nothing to search");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;

        let records = self.records.read().await;
        let mut results: Vec<SearchResult> = records
            .iter()
            .map(|record| SearchResult {
                id: record.id.clone(),
                text: record.text.clone(),
                score: cosine_similarity(&query_vector, &record.embedding),
                metadata: record.metadata.clone(),
            })
            .collect();
        drop(records);

        // sort_by is stable, so equal scores keep insertion order
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        debug!("Search returned {} results", results.len());
        Ok(results)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let records = self.records.read().await;

        Ok(records
            .iter()
            .unique_by(|r| r.metadata.document_id.as_str())
            .map(|r| DocumentSummary {
                id: r.metadata.document_id.clone(),
                name: r.metadata.document_name.clone(),
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut records = self.records.write().await;

        let remaining: Vec<StoredRecord> = records
            .iter()
            .filter(|r| r.metadata.document_id != document_id)
            .cloned()
            .collect();
        let removed = records.len() - remaining.len();

        if removed == 0 {
            debug!("No records for document {}", document_id);
            return Ok(0);
        }

        self.persist(&remaining).await?;
        *records = remaining;

        info!("Deleted {} records of document {}", removed, document_id);
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}
