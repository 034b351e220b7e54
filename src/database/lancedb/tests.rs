use super::*;
use crate::embeddings::{ChunkingConfig, chunk_document};
use crate::test_support::FakeEmbedder;
use tempfile::TempDir;

/// Embeds every text as the same fixed-size vector
struct FixedEmbedder(usize);

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.5; self.0])
    }
}

async fn open_store(temp_dir: &TempDir, embedder: Arc<dyn EmbeddingProvider>) -> LanceVectorStore {
    LanceVectorStore::open(temp_dir.path().join("vectors"), embedder)
        .await
        .expect("should open vector store")
}

fn chunks_of(document_id: &str, name: &str, text: &str) -> Vec<Chunk> {
    chunk_document(text, document_id, name, &ChunkingConfig::default())
}

#[tokio::test]
async fn fresh_store_is_empty() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let embedder = Arc::new(FakeEmbedder::new());
    let store = open_store(&temp_dir, Arc::<FakeEmbedder>::clone(&embedder)).await;

    assert_eq!(store.count().await.expect("count"), 0);
    assert!(store.list_documents().await.expect("list").is_empty());
    assert!(store.search("anything", 5).await.expect("search").is_empty());
    assert_eq!(store.delete_document("missing").await.expect("delete"), 0);
    assert_eq!(embedder.calls(), 0);
    assert!(store.path().exists());
}

#[tokio::test]
async fn insert_and_search_ranks_by_similarity() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir, Arc::new(FakeEmbedder::new())).await;

    for (id, text) in [
        ("doc-1", "Zebras graze quietly."),
        ("doc-2", "Vacation requests need manager approval."),
        ("doc-3", "Expense reports are due monthly."),
    ] {
        store
            .insert(chunks_of(id, &format!("{id}.pdf"), text))
            .await
            .expect("insert");
    }

    let results = store
        .search("Vacation requests need manager approval.", 2)
        .await
        .expect("search");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].metadata.document_id, "doc-2");
    assert_eq!(results[0].metadata.total_chunks, 1);
    assert!((results[0].score - 1.0).abs() < 1e-4);
    assert!(results[0].score >= results[1].score);
}

#[tokio::test]
async fn records_survive_reopen() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    {
        let store = open_store(&temp_dir, Arc::new(FakeEmbedder::new())).await;
        store
            .insert(chunks_of("doc-a", "Handbook.pdf", "Vacation is twenty days. Sick leave is ten days."))
            .await
            .expect("insert");
    }

    let reopened = open_store(&temp_dir, Arc::new(FakeEmbedder::new())).await;

    assert_eq!(reopened.count().await.expect("count"), 1);
    assert_eq!(
        reopened.list_documents().await.expect("list"),
        vec![DocumentSummary {
            id: "doc-a".to_string(),
            name: "Handbook.pdf".to_string()
        }]
    );
}

#[tokio::test]
async fn delete_removes_only_target_document() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir, Arc::new(FakeEmbedder::new())).await;

    let long_text = "Travel must be booked early. ".repeat(150);
    let travel_chunks = chunks_of("doc-travel", "Travel.pdf", &long_text);
    let travel_count = travel_chunks.len();
    store.insert(travel_chunks).await.expect("insert");
    store
        .insert(chunks_of("o'brien", "O'Brien notes.pdf", "Quotes need escaping."))
        .await
        .expect("insert");

    assert_eq!(
        store.delete_document("doc-travel").await.expect("delete"),
        travel_count
    );
    assert_eq!(store.count().await.expect("count"), 1);

    assert_eq!(store.delete_document("o'brien").await.expect("delete"), 1);
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    {
        let store = open_store(&temp_dir, Arc::new(FixedEmbedder(4))).await;
        store
            .insert(chunks_of("doc-a", "A.pdf", "Four dimensions."))
            .await
            .expect("insert");
    }

    let store = open_store(&temp_dir, Arc::new(FixedEmbedder(8))).await;
    let result = store
        .insert(chunks_of("doc-b", "B.pdf", "Eight dimensions."))
        .await;

    assert!(matches!(result, Err(RagError::Persistence(_))));
    assert_eq!(store.count().await.expect("count"), 1);
}

#[tokio::test]
async fn embedding_failure_stores_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir, Arc::new(FakeEmbedder::failing_on("poison"))).await;

    let result = store
        .insert(chunks_of("doc-a", "A.pdf", "A poison sentence."))
        .await;

    assert!(matches!(result, Err(RagError::Embedding(_))));
    assert_eq!(store.count().await.expect("count"), 0);
}

#[test]
fn undefined_distance_scores_zero() {
    assert!((similarity_from_distance(0.25) - 0.75).abs() < f32::EPSILON);
    assert_eq!(similarity_from_distance(f32::NAN), 0.0);
    assert_eq!(similarity_from_distance(f32::INFINITY), 0.0);
}

#[tokio::test]
async fn zero_query_vector_scores_zero() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir, Arc::new(FakeEmbedder::new())).await;
    for (id, text) in [
        ("doc-1", "Vacation requests need approval."),
        ("doc-2", "Expense reports are due monthly."),
    ] {
        store
            .insert(chunks_of(id, &format!("{id}.pdf"), text))
            .await
            .expect("insert");
    }

    // No letters, so the histogram embedding is all zeros
    let results = store.search("2024", 5).await.expect("search");

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.score == 0.0));
}

#[tokio::test]
async fn stored_zero_vector_never_outranks_a_match() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = open_store(&temp_dir, Arc::new(FakeEmbedder::new())).await;
    store
        .insert(chunks_of("doc-numbers", "Numbers.pdf", "1234 5678."))
        .await
        .expect("insert");
    store
        .insert(chunks_of("doc-vacation", "Vacation.pdf", "Vacation requests need approval."))
        .await
        .expect("insert");

    let results = store
        .search("Vacation requests need approval.", 5)
        .await
        .expect("search");

    assert!(!results.is_empty());
    assert_eq!(results[0].metadata.document_id, "doc-vacation");
    assert!(results.iter().all(|r| r.score.is_finite()));
}
