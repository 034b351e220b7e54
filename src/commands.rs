use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::open_store;
use crate::documents::{DocumentUpload, PdfExtractor};
use crate::embeddings::{EmbeddingProvider, OllamaClient};
use crate::rag::{RagService, RagSettings, format_reply};

/// Wire the Ollama client, the configured store and the PDF extractor together
#[inline]
pub async fn build_service(config: &Config) -> Result<RagService> {
    let client = Arc::new(
        OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?,
    );

    let embedder: Arc<dyn EmbeddingProvider> = Arc::<OllamaClient>::clone(&client);
    let store = open_store(config, embedder)
        .await
        .context("Failed to open vector store")?;

    Ok(RagService::new(
        store,
        client,
        Arc::new(PdfExtractor),
        RagSettings::from_config(config),
    ))
}

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Upload for a file on disk, stored under `name` when one is given
fn upload_for(path: &Path, bytes: Vec<u8>, name: Option<String>) -> DocumentUpload {
    let file_name = path
        .file_name()
        .map(|file_name| file_name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let upload = DocumentUpload::new(file_name, bytes);
    match name {
        Some(name) => upload.with_display_name(name),
        None => upload,
    }
}

/// Upload a PDF from disk. The file itself is left untouched.
#[inline]
pub async fn upload_document(config: &Config, path: &Path, name: Option<String>) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let upload = upload_for(path, bytes, name);

    info!("Uploading {} as '{}'", path.display(), upload.document_name());
    let service = build_service(config).await?;

    let bar = spinner(&format!("Processing {}", upload.document_name()));
    let result = service.ingest_upload(upload).await;
    bar.finish_and_clear();

    if !result.success {
        bail!(
            "Upload failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    println!(
        "{} {} ({} chunks)",
        style("✓ Stored").green(),
        style(result.document_name.unwrap_or_default()).bold(),
        result.chunks_created.unwrap_or_default()
    );
    println!(
        "   Document ID: {}",
        style(result.document_id.unwrap_or_default()).cyan()
    );

    Ok(())
}

/// Ask a question and print the answer with its sources
#[inline]
pub async fn query_documents(config: &Config, question: &str, json: bool) -> Result<()> {
    let service = build_service(config).await?;

    let bar = spinner("Thinking...");
    let result = service.query(question).await;
    bar.finish_and_clear();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?
        );
        return Ok(());
    }

    if !result.success {
        bail!("{}", format_reply(&result));
    }

    println!("{}", result.answer.as_deref().unwrap_or_default());

    let sources = result.sources.unwrap_or_default();
    if !sources.is_empty() {
        println!();
        println!("{}", style("Sources:").bold().yellow());
        for source in &sources {
            println!(
                "  📄 {} (chunk {}, relevance {:.3})",
                source.document_name, source.chunk_index, source.relevance_score
            );
        }
    }

    Ok(())
}

/// List stored documents
#[inline]
pub async fn list_documents(config: &Config) -> Result<()> {
    let service = build_service(config).await?;
    let documents = service
        .list_documents()
        .await
        .context("Failed to list documents")?;

    if documents.is_empty() {
        println!("No documents have been uploaded yet.");
        println!("Use 'docs-rag upload <file.pdf>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    println!();
    for document in &documents {
        println!("📄 {}", style(&document.name).bold());
        println!("   ID: {}", document.id);
    }

    Ok(())
}

/// Delete a document and all of its chunks
#[inline]
pub async fn delete_document(config: &Config, document_id: &str) -> Result<()> {
    let service = build_service(config).await?;
    let removed = service
        .delete_document(document_id)
        .await
        .context("Failed to delete document")?;

    if removed == 0 {
        println!("No document with ID {} was found.", document_id);
    } else {
        println!(
            "{} document {} ({} chunks removed)",
            style("✓ Deleted").green(),
            document_id,
            removed
        );
    }

    Ok(())
}

/// Report Ollama health and the size of the vector store
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Docs-RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let url = client.base_url().clone();
            let health = tokio::task::spawn_blocking(move || client.health_check())
                .await
                .context("Health check task failed")?;
            match health {
                Ok(()) => {
                    println!("   ✅ Ollama: Connected ({})", url);
                    println!("   📋 Answer model: {}", config.ollama.model);
                    println!("   🔢 Embedding model: {}", config.ollama.embed_model);
                }
                Err(e) => {
                    warn!("Ollama health check failed: {:#}", e);
                    println!("   ⚠️  Ollama: Unhealthy at {} - {:#}", url, e);
                }
            }
        }
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }

    println!();
    println!("🔍 Vector Store Status:");
    match build_service(config).await {
        Ok(service) => match service.record_count().await {
            Ok(count) => {
                println!("   ✅ Backend: {}", config.storage.backend);
                println!("   🧩 Stored chunks: {}", count);
            }
            Err(e) => println!("   ❌ Failed to count records - {}", e),
        },
        Err(e) => println!("   ❌ Failed to open store - {:#}", e),
    }

    Ok(())
}
