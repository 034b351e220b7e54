// Documents module
// Upload validation, the staged upload file and PDF text extraction

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{RagError, Result};

/// Every PDF file starts with this marker
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Default upload size limit, 10 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// A document as received from the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    /// File name as uploaded; this is what validation checks
    pub file_name: String,
    /// Name shown in listings and sources, defaults to the file name
    pub display_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    #[inline]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            display_name: None,
            bytes,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// The name the document is stored under
    #[inline]
    pub fn document_name(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.file_name.trim())
    }
}

/// Pulls plain text out of a stored document file
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String>;
}

/// Text extraction backed by `pdf-extract`
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

#[async_trait]
impl TextExtractor for PdfExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RagError::Extraction(format!("Failed to read {}: {}", path.display(), e))
        })?;

        debug!("Extracting text from {} ({} bytes)", path.display(), bytes.len());

        // Parsing is CPU-bound and may panic on hostile input
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| RagError::Extraction(format!("PDF parser crashed: {}", e)))?
            .map_err(|e| RagError::Extraction(format!("PDF extraction error: {}", e)))?;

        debug!("Extracted {} characters", text.len());
        Ok(text)
    }
}

/// Check an upload before anything is written to disk
#[inline]
pub fn validate_upload(upload: &DocumentUpload, max_bytes: u64) -> Result<()> {
    if upload.file_name.trim().is_empty() {
        return Err(RagError::Validation("No file uploaded".to_string()));
    }

    let has_pdf_extension = Path::new(upload.file_name.trim())
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !has_pdf_extension {
        return Err(RagError::Validation(
            "Only PDF files are allowed".to_string(),
        ));
    }

    if upload.bytes.is_empty() {
        return Err(RagError::Validation("Uploaded file is empty".to_string()));
    }

    let size = u64::try_from(upload.bytes.len()).unwrap_or(u64::MAX);
    if size > max_bytes {
        return Err(RagError::Validation(format!(
            "File is {} bytes, the upload limit is {} bytes",
            size, max_bytes
        )));
    }

    if !upload.bytes.starts_with(PDF_MAGIC) {
        return Err(RagError::Validation(
            "Only PDF files are allowed".to_string(),
        ));
    }

    Ok(())
}

/// An upload written to the staging directory.
///
/// The file is removed when this value is dropped, whichever way ingestion ends.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    /// Write `bytes` under a fresh unique name in `dir`
    #[inline]
    pub async fn write(dir: &Path, bytes: &[u8]) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let staged = Self {
            path: dir.join(format!("{}.pdf", Uuid::new_v4())),
        };
        tokio::fs::write(&staged.path, bytes).await?;

        debug!("Staged upload at {}", staged.path.display());
        Ok(staged)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    #[inline]
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Error cleaning up staged upload {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
