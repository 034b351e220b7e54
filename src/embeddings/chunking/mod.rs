
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rough number of characters that make up one token.
/// This is an approximation, not a real tokenizer.
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Identifies the document a chunk was cut from and where it sits in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub document_id: String,
    pub document_name: String,
    /// Zero-based position of this chunk within its document
    pub chunk_index: usize,
    /// Number of chunks the document was split into
    pub total_chunks: usize,
}

/// A bounded-size segment of document text, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Configuration for document chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Token budget per chunk
    pub chunk_size: usize,
    /// Tokens copied from the tail of a chunk into the start of the next one
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Number of trailing characters carried into the next chunk
    #[inline]
    pub const fn overlap_chars(&self) -> usize {
        self.chunk_overlap * CHARS_PER_TOKEN
    }
}

/// Split extracted document text into overlapping, sentence-aligned chunks.
///
/// Each new chunk opens with the full overlap tail of the previous one, so a
/// chunk may exceed `chunk_size` by up to `chunk_overlap` tokens plus one
/// separator character. A single sentence longer than the budget is emitted
/// whole.
///
/// The output only depends on its inputs: the same text, ids and config
/// always produce the same chunk sequence. Empty or whitespace-only text
/// yields no chunks.
#[inline]
pub fn chunk_document(
    text: &str,
    document_id: &str,
    document_name: &str,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let overlap_chars = config.overlap_chars();
    let mut texts: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for sentence in split_sentences(&normalized) {
        if !buffer.is_empty() && projected_token_count(&buffer, sentence) > config.chunk_size {
            let closed = std::mem::take(&mut buffer);
            let overlap = tail_chars(&closed, overlap_chars);
            append_segment(&mut buffer, overlap.trim_start());
            append_segment(&mut buffer, sentence);
            texts.push(closed);
        } else {
            append_segment(&mut buffer, sentence);
        }
    }

    if !buffer.is_empty() {
        texts.push(buffer);
    }

    let total_chunks = texts.len();
    let chunks: Vec<Chunk> = texts
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk {
            id: format!("{}-{}", document_id, chunk_index),
            text,
            metadata: ChunkMetadata {
                document_id: document_id.to_string(),
                document_name: document_name.to_string(),
                chunk_index,
                total_chunks,
            },
        })
        .collect();

    debug!(
        "Chunked document '{}' into {} chunks (avg {} tokens)",
        document_name,
        chunks.len(),
        chunks
            .iter()
            .map(|c| estimate_token_count(&c.text))
            .sum::<usize>()
            / chunks.len().max(1)
    );

    chunks
}

/// Estimate token count as one token per four characters, rounded up
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Collapse every whitespace run into a single space and trim both ends
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text after each run of terminal punctuation.
///
/// Text without any terminal punctuation comes back as a single segment, and
/// whatever follows the last terminator is kept as a final segment.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&ch) {
            continue;
        }
        if chars
            .peek()
            .is_some_and(|&(_, next)| SENTENCE_TERMINATORS.contains(&next))
        {
            continue;
        }

        let end = idx + ch.len_utf8();
        if let Some(sentence) = text.get(start..end).map(str::trim) {
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
        }
        start = end;
    }

    if let Some(rest) = text.get(start..).map(str::trim) {
        if !rest.is_empty() {
            sentences.push(rest);
        }
    }

    sentences
}

/// Estimated tokens of `buffer` once `segment` has been appended to it
fn projected_token_count(buffer: &str, segment: &str) -> usize {
    let separator = usize::from(!buffer.is_empty());
    (buffer.chars().count() + separator + segment.chars().count()).div_ceil(CHARS_PER_TOKEN)
}

fn append_segment(buffer: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(segment);
}

/// The last `count` characters of `text`
fn tail_chars(text: &str, count: usize) -> String {
    if count == 0 {
        return String::new();
    }
    let skip = text.chars().count().saturating_sub(count);
    text.chars().skip(skip).collect()
}
