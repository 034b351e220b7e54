// LanceDB vector store
// Chunks and their embeddings in an embedded LanceDB table, searched by
// cosine distance

#[cfg(test)]
mod tests;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DocumentSummary, SearchResult, StoredRecord, VectorStore};
use crate::embeddings::{Chunk, ChunkMetadata, EmbeddingProvider};
use crate::{RagError, Result};

const TABLE_NAME: &str = "chunks";

pub struct LanceVectorStore {
    connection: Connection,
    db_path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    /// Serializes inserts and deletes, including first-time table creation
    write_lock: Mutex<()>,
}

fn lance_error<E: std::fmt::Display>(action: &'static str) -> impl FnOnce(E) -> RagError {
    move |e| RagError::Persistence(format!("Failed to {}: {}", action, e))
}

impl LanceVectorStore {
    /// Connect to (or create) the database directory at `db_path`.
    /// The table itself is created by the first insert.
    #[inline]
    pub async fn open<P: AsRef<Path>>(
        db_path: P,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        tokio::fs::create_dir_all(&db_path).await.map_err(|e| {
            RagError::Persistence(format!(
                "Failed to create vector database directory: {}",
                e
            ))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(lance_error("connect to LanceDB"))?;

        info!("Vector store opened at {}", db_path.display());
        Ok(Self {
            connection,
            db_path,
            embedder,
            write_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn existing_table(&self) -> Result<Option<Table>> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(lance_error("list tables"))?;

        if !table_names.iter().any(|name| name == TABLE_NAME) {
            return Ok(None);
        }

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(lance_error("open table"))?;
        Ok(Some(table))
    }

    async fn create_table(&self, vector_dim: usize) -> Result<Table> {
        info!(
            "Creating {} table with vector dimension {}",
            TABLE_NAME, vector_dim
        );

        self.connection
            .create_empty_table(TABLE_NAME, create_schema(vector_dim)?)
            .execute()
            .await
            .map_err(lance_error("create table"))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
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

        let records: Vec<StoredRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| StoredRecord::from_chunk(chunk, embedding))
            .collect();

        let vector_dim = records.first().map_or(0, |r| r.embedding.len());
        if let Some(odd) = records.iter().find(|r| r.embedding.len() != vector_dim) {
            return Err(RagError::Embedding(format!(
                "Embedding for chunk {} has {} dimensions, expected {}",
                odd.id,
                odd.embedding.len(),
                vector_dim
            )));
        }

        let _guard = self.write_lock.lock().await;

        let table = match self.existing_table().await? {
            Some(table) => {
                let table_dim = vector_dimension(&table).await?;
                if table_dim != vector_dim {
                    return Err(RagError::Persistence(format!(
                        "Embedding dimension {} does not match stored dimension {}",
                        vector_dim, table_dim
                    )));
                }
                table
            }
            None => self.create_table(vector_dim).await?,
        };

        let batch = create_record_batch(&records, vector_dim)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(lance_error("insert records"))?;

        info!("Stored {} records", records.len());
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let Some(table) = self.existing_table().await? else {
            return Ok(Vec::new());
        };

        let rows = table
            .count_rows(None)
            .await
            .map_err(lance_error("count rows"))?;
        if rows == 0 || top_k == 0 {
            debug!("Nothing to search");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        let table_dim = vector_dimension(&table).await?;
        if query_vector.len() != table_dim {
            return Err(RagError::Persistence(format!(
                "Query embedding has {} dimensions, stored vectors have {}",
                query_vector.len(),
                table_dim
            )));
        }

        // A zero vector is equally dissimilar to everything, so take rows in stored order
        let mut stream = if query_vector.iter().all(|&v| v == 0.0) {
            debug!("Query embedding has zero magnitude");
            table
                .query()
                .limit(top_k)
                .execute()
                .await
                .map_err(lance_error("scan records"))?
        } else {
            table
                .vector_search(query_vector)
                .map_err(lance_error("create vector search"))?
                .column("vector")
                .distance_type(DistanceType::Cosine)
                .limit(top_k)
                .execute()
                .await
                .map_err(lance_error("execute search"))?
        };

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(lance_error("read search results"))?
        {
            results.extend(parse_search_batch(&batch)?);
        }

        // LanceDB returns nearest first; the stable sort only fixes up batch seams
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        debug!("Search returned {} results", results.len());
        Ok(results)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let Some(table) = self.existing_table().await? else {
            return Ok(Vec::new());
        };

        let rows = table
            .count_rows(None)
            .await
            .map_err(lance_error("count rows"))?;
        if rows == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["document_id", "document_name"]))
            .limit(rows)
            .execute()
            .await
            .map_err(lance_error("scan documents"))?
            .try_collect()
            .await
            .map_err(lance_error("read documents"))?;

        let mut pairs = Vec::with_capacity(rows);
        for batch in &batches {
            let ids = string_column(batch, "document_id")?;
            let names = string_column(batch, "document_name")?;
            for row in 0..batch.num_rows() {
                pairs.push((ids.value(row), names.value(row)));
            }
        }

        Ok(pairs
            .into_iter()
            .unique_by(|&(id, _)| id)
            .map(|(id, name)| DocumentSummary {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let Some(table) = self.existing_table().await? else {
            return Ok(0);
        };

        let predicate = format!("document_id = '{}'", document_id.replace('\'', "''"));
        let matching = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(lance_error("count document rows"))?;

        if matching == 0 {
            debug!("No records for document {}", document_id);
            return Ok(0);
        }

        table
            .delete(&predicate)
            .await
            .map_err(lance_error("delete document"))?;

        info!("Deleted {} records of document {}", matching, document_id);
        Ok(matching)
    }

    async fn count(&self) -> Result<usize> {
        match self.existing_table().await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map_err(lance_error("count rows")),
            None => Ok(0),
        }
    }
}

fn list_size(vector_dim: usize) -> Result<i32> {
    i32::try_from(vector_dim).map_err(|_| {
        RagError::Persistence(format!("Vector dimension {} is too large", vector_dim))
    })
}

fn vector_field(vector_dim: usize) -> Result<DataType> {
    Ok(DataType::FixedSizeList(
        Arc::new(Field::new("item", DataType::Float32, false)),
        list_size(vector_dim)?,
    ))
}

fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("vector", vector_field(vector_dim)?, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("document_name", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("total_chunks", DataType::UInt32, false),
    ])))
}

async fn vector_dimension(table: &Table) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(lance_error("read table schema"))?;

    schema
        .field_with_name("vector")
        .ok()
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
        .ok_or_else(|| RagError::Persistence("Table has no usable vector column".to_string()))
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RagError::Persistence(format!("{} {} does not fit in u32", what, value)))
}

fn create_record_batch(records: &[StoredRecord], vector_dim: usize) -> Result<RecordBatch> {
    let len = records.len();

    let mut ids = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * vector_dim);
    let mut texts = Vec::with_capacity(len);
    let mut document_ids = Vec::with_capacity(len);
    let mut document_names = Vec::with_capacity(len);
    let mut chunk_indices = Vec::with_capacity(len);
    let mut totals = Vec::with_capacity(len);

    for record in records {
        ids.push(record.id.as_str());
        flat_values.extend_from_slice(&record.embedding);
        texts.push(record.text.as_str());
        document_ids.push(record.metadata.document_id.as_str());
        document_names.push(record.metadata.document_name.as_str());
        chunk_indices.push(to_u32(record.metadata.chunk_index, "Chunk index")?);
        totals.push(to_u32(record.metadata.total_chunks, "Chunk total")?);
    }

    let size = list_size(vector_dim)?;
    let item = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array =
        FixedSizeListArray::try_new(item, size, Arc::new(Float32Array::from(flat_values)), None)
            .map_err(|e| {
                RagError::Persistence(format!("Failed to create vector array: {}", e))
            })?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(texts)),
        Arc::new(StringArray::from(document_ids)),
        Arc::new(StringArray::from(document_names)),
        Arc::new(UInt32Array::from(chunk_indices)),
        Arc::new(UInt32Array::from(totals)),
    ];

    RecordBatch::try_new(create_schema(vector_dim)?, arrays)
        .map_err(|e| RagError::Persistence(format!("Failed to create record batch: {}", e)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Persistence(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Persistence(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Persistence(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::Persistence(format!("Invalid {} column type", name)))
}

/// Cosine distance is 1 - similarity. Distances involving a zero vector are
/// undefined and count as no similarity.
fn similarity_from_distance(distance: f32) -> f32 {
    if distance.is_finite() {
        1.0 - distance
    } else {
        0.0
    }
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    let ids = string_column(batch, "id")?;
    let texts = string_column(batch, "text")?;
    let document_ids = string_column(batch, "document_id")?;
    let document_names = string_column(batch, "document_name")?;
    let chunk_indices = u32_column(batch, "chunk_index")?;
    let totals = u32_column(batch, "total_chunks")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|row| {
            let distance = distances
                .filter(|d| !d.is_null(row))
                .map_or(1.0, |d| d.value(row));

            SearchResult {
                id: ids.value(row).to_string(),
                text: texts.value(row).to_string(),
                score: similarity_from_distance(distance),
                metadata: ChunkMetadata {
                    document_id: document_ids.value(row).to_string(),
                    document_name: document_names.value(row).to_string(),
                    chunk_index: chunk_indices.value(row) as usize,
                    total_chunks: totals.value(row) as usize,
                },
            }
        })
        .collect())
}
