// Retrieval and answering
// Ingestion path (upload -> text -> chunks -> store) and query path
// (question -> ranked chunks -> answer with sources)


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::{DocumentSummary, VectorStore};
use crate::documents::{DocumentUpload, StagedUpload, TextExtractor, validate_upload};
use crate::embeddings::{AnswerGenerator, ChunkingConfig, chunk_document};
use crate::{RagError, Result};

/// Answer given when nothing in the store matches a question
pub const NO_DOCUMENTS_MESSAGE: &str =
    "No relevant documents found to answer your question. Please upload some documents first.";

/// Reply used when a failed query carries no error text
pub const REPLY_FALLBACK: &str = "Sorry, I encountered an error while processing your question.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagSettings {
    pub chunking: ChunkingConfig,
    /// Directory where uploads are staged during extraction
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub top_k: usize,
}

impl RagSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.clone(),
            uploads_dir: config.uploads_dir(),
            max_upload_bytes: config.storage.max_upload_bytes,
            top_k: config.retrieval.top_k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_created: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    fn stored(document_id: String, document_name: &str, chunks_created: usize) -> Self {
        Self {
            success: true,
            document_id: Some(document_id),
            document_name: Some(document_name.to_string()),
            chunks_created: Some(chunks_created),
            error: None,
        }
    }

    fn failed(error: &RagError) -> Self {
        Self {
            success: false,
            document_id: None,
            document_name: None,
            chunks_created: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAttribution {
    pub document_name: String,
    pub chunk_index: usize,
    /// Cosine similarity of the chunk to the question, higher is better
    pub relevance_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceAttribution>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    fn answered(answer: String, sources: Vec<SourceAttribution>) -> Self {
        Self {
            success: true,
            answer: Some(answer),
            sources: Some(sources),
            error: None,
        }
    }

    fn failed(error: &RagError) -> Self {
        Self {
            success: false,
            answer: None,
            sources: None,
            error: Some(error.to_string()),
        }
    }
}

/// Ties the store, the generator and the extractor together.
///
/// Entry points return outcome values; failures are reported in them rather
/// than propagated.
pub struct RagService {
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn AnswerGenerator>,
    extractor: Arc<dyn TextExtractor>,
    settings: RagSettings,
}

impl RagService {
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn AnswerGenerator>,
        extractor: Arc<dyn TextExtractor>,
        settings: RagSettings,
    ) -> Self {
        Self {
            store,
            generator,
            extractor,
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Validate, stage, extract, chunk and store an uploaded PDF.
    /// The staged file is gone by the time this returns.
    #[inline]
    pub async fn ingest_upload(&self, upload: DocumentUpload) -> UploadResult {
        let name = upload.document_name().to_string();
        match self.try_ingest_upload(upload).await {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to ingest '{}': {}", name, e);
                UploadResult::failed(&e)
            }
        }
    }

    async fn try_ingest_upload(&self, upload: DocumentUpload) -> Result<UploadResult> {
        validate_upload(&upload, self.settings.max_upload_bytes)?;

        let staged = StagedUpload::write(&self.settings.uploads_dir, &upload.bytes).await?;
        let text = self.extractor.extract_text(staged.path()).await?;
        let result = self.ingest_text(upload.document_name(), &text).await;
        drop(staged);

        result
    }

    /// Chunk and store already-extracted text under a new document id
    #[inline]
    pub async fn ingest_text(&self, document_name: &str, text: &str) -> Result<UploadResult> {
        let document_id = Uuid::new_v4().to_string();
        let chunks = chunk_document(text, &document_id, document_name, &self.settings.chunking);

        if chunks.is_empty() {
            return Err(RagError::Validation(format!(
                "'{}' contains no extractable text",
                document_name
            )));
        }

        let chunks_created = chunks.len();
        self.store.insert(chunks).await?;

        info!(
            "Stored '{}' as document {} ({} chunks)",
            document_name, document_id, chunks_created
        );
        Ok(UploadResult::stored(
            document_id,
            document_name,
            chunks_created,
        ))
    }

    /// Answer a question from the stored documents
    #[inline]
    pub async fn query(&self, question: &str) -> QueryResult {
        match self.try_query(question).await {
            Ok(result) => result,
            Err(e) => {
                error!("Query failed: {}", e);
                QueryResult::failed(&e)
            }
        }
    }

    async fn try_query(&self, question: &str) -> Result<QueryResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Validation(
                "Question is required and must not be blank".to_string(),
            ));
        }

        let results = self.store.search(question, self.settings.top_k).await?;

        if results.is_empty() {
            debug!("No stored chunks to answer from");
            return Ok(QueryResult::answered(
                NO_DOCUMENTS_MESSAGE.to_string(),
                Vec::new(),
            ));
        }

        let passages: Vec<String> = results.iter().map(|r| r.text.clone()).collect();
        let answer = self.generator.generate_answer(question, &passages).await?;

        let sources = results
            .into_iter()
            .map(|r| SourceAttribution {
                document_name: r.metadata.document_name,
                chunk_index: r.metadata.chunk_index,
                relevance_score: r.score,
            })
            .collect();

        Ok(QueryResult::answered(answer, sources))
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.store.list_documents().await
    }

    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let removed = self.store.delete_document(document_id).await?;
        if removed == 0 {
            warn!("Document {} not found", document_id);
        }
        Ok(removed)
    }

    /// Number of stored chunk records
    #[inline]
    pub async fn record_count(&self) -> Result<usize> {
        self.store.count().await
    }
}

/// Render a query outcome as a chat reply: the answer followed by the
/// distinct source document names
#[inline]
pub fn format_reply(result: &QueryResult) -> String {
    match (&result.answer, result.success) {
        (Some(answer), true) => {
            let names = result
                .sources
                .iter()
                .flatten()
                .map(|source| source.document_name.as_str())
                .unique()
                .join(", ");

            if names.is_empty() {
                answer.clone()
            } else {
                format!("{}\n\nSources: {}", answer, names)
            }
        }
        _ => result
            .error
            .clone()
            .unwrap_or_else(|| REPLY_FALLBACK.to_string()),
    }
}
