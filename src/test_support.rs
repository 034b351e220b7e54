// Deterministic stand-ins for the model service and the PDF parser

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::documents::TextExtractor;
use crate::embeddings::{AnswerGenerator, EmbeddingProvider};
use crate::{RagError, Result};

/// Embeds text as its letter histogram, so identical texts have similarity 1.0
#[derive(Debug, Default)]
pub(crate) struct FakeEmbedder {
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl FakeEmbedder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail any text containing `needle`
    pub(crate) fn failing_on(needle: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(needle.to_string()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector_for(text: &str) -> Vec<f32> {
        let mut histogram = vec![0.0_f32; 26];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            let slot = usize::from(c.to_ascii_lowercase() as u8 - b'a');
            if let Some(count) = histogram.get_mut(slot) {
                *count += 1.0;
            }
        }
        histogram
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                return Err(RagError::Embedding("model unavailable".to_string()));
            }
        }
        Ok(Self::vector_for(text))
    }
}

/// Echoes a fixed answer and records what it was asked
#[derive(Debug)]
pub(crate) struct FakeGenerator {
    answer: Option<String>,
    requests: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeGenerator {
    pub(crate) fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            answer: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<(String, Vec<String>)> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

#[async_trait]
impl AnswerGenerator for FakeGenerator {
    async fn generate_answer(&self, question: &str, passages: &[String]) -> Result<String> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push((question.to_string(), passages.to_vec()));
        self.answer
            .clone()
            .ok_or_else(|| RagError::Generation("generator offline".to_string()))
    }
}

/// Returns canned text and remembers which staged files it was shown
#[derive(Debug)]
pub(crate) struct StubExtractor {
    text: Option<String>,
    seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl StubExtractor {
    pub(crate) fn returning(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            text: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Paths handed to the extractor, with whether the file existed at the time
    pub(crate) fn seen(&self) -> Vec<(PathBuf, bool)> {
        self.seen.lock().expect("seen lock poisoned").clone()
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract_text(&self, path: &Path) -> Result<String> {
        self.seen
            .lock()
            .expect("seen lock poisoned")
            .push((path.to_path_buf(), path.exists()));
        self.text
            .clone()
            .ok_or_else(|| RagError::Extraction("not a readable PDF".to_string()))
    }
}
