//! LanceDB vector database client
//!
//! Each namespace is its own LanceDB table, so a tenant's search never scans
//! another tenant's rows and purging a tenant is a single `drop_table`.

use super::{ScoredRef, VectorEntry, VectorIndex};
use crate::error::VectorDbError;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    types::Float32Type,
};
use arrow_schema::{DataType, Field, Schema};
use futures::stream::TryStreamExt;
use lancedb::{DistanceType, Table};
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

/// LanceDB vector database implementation (embedded, no server required)
pub struct LanceVectorDB {
    connection: Connection,
    db_path: String,
}

impl LanceVectorDB {
    /// Create a new LanceDB instance with default path
    pub async fn new() -> Result<Self, VectorDbError> {
        let db_path = Self::default_lancedb_path();
        Self::with_path(&db_path).await
    }

    /// Create a new LanceDB instance with custom path
    pub async fn with_path(db_path: &str) -> Result<Self, VectorDbError> {
        tracing::info!("Connecting to LanceDB at: {}", db_path);

        let connection = lancedb::connect(db_path)
            .execute()
            .await
            .map_err(|e| VectorDbError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            connection,
            db_path: db_path.to_string(),
        })
    }

    /// Get default database path
    pub fn default_lancedb_path() -> String {
        crate::paths::PlatformPaths::default_lancedb_path()
            .to_string_lossy()
            .to_string()
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Create schema for a namespace table
    fn create_schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("vector_ref", DataType::Utf8, false),
            Field::new("file_id", DataType::Utf8, false),
            Field::new("chunk_id", DataType::Utf8, false),
        ]))
    }

    async fn table_exists(&self, namespace: &str) -> Result<bool, VectorDbError> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| VectorDbError::ConnectionFailed(format!("Failed to list tables: {}", e)))?;
        Ok(names.iter().any(|n| n == namespace))
    }

    async fn open(&self, namespace: &str) -> Result<Option<Table>, VectorDbError> {
        if !self.table_exists(namespace).await? {
            return Ok(None);
        }
        self.connection
            .open_table(namespace)
            .execute()
            .await
            .map(Some)
            .map_err(|e| VectorDbError::ConnectionFailed(format!("Failed to open table: {}", e)))
    }

    /// Dimension of the vector column of an existing table
    async fn table_dimension(table: &Table) -> Result<usize, VectorDbError> {
        let schema = table
            .schema()
            .await
            .map_err(|e| VectorDbError::ConnectionFailed(e.to_string()))?;
        match schema.field_with_name("vector").map(|f| f.data_type().clone()) {
            Ok(DataType::FixedSizeList(_, size)) => Ok(size as usize),
            _ => Err(VectorDbError::InitializationFailed(
                "table has no fixed-size vector column".to_string(),
            )),
        }
    }

    /// Convert entries to a RecordBatch
    fn create_record_batch(
        entries: &[VectorEntry],
        dimension: usize,
        schema: Arc<Schema>,
    ) -> Result<RecordBatch, VectorDbError> {
        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            entries
                .iter()
                .map(|e| Some(e.vector.iter().copied().map(Some))),
            dimension as i32,
        );
        let refs = StringArray::from(
            entries
                .iter()
                .map(|e| e.vector_ref.as_str())
                .collect::<Vec<_>>(),
        );
        let file_ids =
            StringArray::from(entries.iter().map(|e| e.file_id.as_str()).collect::<Vec<_>>());
        let chunk_ids =
            StringArray::from(entries.iter().map(|e| e.chunk_id.as_str()).collect::<Vec<_>>());

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(vector_array),
                Arc::new(refs),
                Arc::new(file_ids),
                Arc::new(chunk_ids),
            ],
        )
        .map_err(|e| VectorDbError::StoreFailed(format!("Failed to create RecordBatch: {}", e)))
    }

    /// SQL predicate selecting the given references
    fn refs_filter(vector_refs: &[String]) -> String {
        let quoted: Vec<String> = vector_refs
            .iter()
            .map(|r| format!("'{}'", r.replace('\'', "''")))
            .collect();
        format!("vector_ref IN ({})", quoted.join(", "))
    }

    fn string_column<'a>(
        batch: &'a RecordBatch,
        name: &str,
    ) -> Result<&'a StringArray, VectorDbError> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| VectorDbError::SearchFailed(format!("Missing {} column", name)))
    }
}

/// Similarity in [0, 1] from a cosine distance, on the same scale as
/// [`super::memory::cosine_similarity`]
fn cosine_score(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

#[async_trait::async_trait]
impl VectorIndex for LanceVectorDB {
    async fn ensure_namespace(
        &self,
        namespace: &str,
        dimension: usize,
    ) -> Result<(), VectorDbError> {
        if let Some(table) = self.open(namespace).await? {
            let existing = Self::table_dimension(&table).await?;
            if existing != dimension {
                return Err(VectorDbError::DimensionMismatch {
                    namespace: namespace.to_string(),
                    expected: existing,
                    actual: dimension,
                });
            }
            return Ok(());
        }

        let schema = Self::create_schema(dimension);
        let empty_batch = RecordBatch::new_empty(schema.clone());
        let batches =
            RecordBatchIterator::new(vec![empty_batch].into_iter().map(Ok), schema.clone());

        self.connection
            .create_table(namespace, Box::new(batches))
            .execute()
            .await
            .map_err(|e| VectorDbError::NamespaceCreationFailed {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            "Created LanceDB table '{}' (dimension {})",
            namespace,
            dimension
        );
        Ok(())
    }

    async fn upsert(
        &self,
        namespace: &str,
        entries: Vec<VectorEntry>,
    ) -> Result<usize, VectorDbError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let table = self
            .open(namespace)
            .await?
            .ok_or_else(|| VectorDbError::NamespaceNotFound(namespace.to_string()))?;
        let dimension = Self::table_dimension(&table).await?;
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != dimension) {
            return Err(VectorDbError::DimensionMismatch {
                namespace: namespace.to_string(),
                expected: dimension,
                actual: bad.vector.len(),
            });
        }

        let refs: Vec<String> = entries.iter().map(|e| e.vector_ref.clone()).collect();
        table
            .delete(&Self::refs_filter(&refs))
            .await
            .map_err(|e| VectorDbError::StoreFailed(format!("Failed to replace rows: {}", e)))?;

        let schema = Self::create_schema(dimension);
        let batch = Self::create_record_batch(&entries, dimension, schema.clone())?;
        let count = batch.num_rows();
        let batches = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema);

        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| VectorDbError::StoreFailed(format!("Failed to add rows: {}", e)))?;

        tracing::debug!("Stored {} vectors in '{}'", count, namespace);
        Ok(count)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<ScoredRef>, VectorDbError> {
        let Some(table) = self.open(namespace).await? else {
            return Ok(Vec::new());
        };

        let stream = table
            .vector_search(vector)
            .map_err(|e| VectorDbError::SearchFailed(e.to_string()))?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| VectorDbError::SearchFailed(e.to_string()))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| VectorDbError::SearchFailed(e.to_string()))?;

        let mut hits = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| VectorDbError::SearchFailed("Missing _distance column".into()))?;
            let refs = Self::string_column(batch, "vector_ref")?;
            let file_ids = Self::string_column(batch, "file_id")?;
            let chunk_ids = Self::string_column(batch, "chunk_id")?;

            for i in 0..batch.num_rows() {
                let distance = distances.value(i);
                hits.push(ScoredRef {
                    vector_ref: refs.value(i).to_string(),
                    chunk_id: chunk_ids.value(i).to_string(),
                    file_id: file_ids.value(i).to_string(),
                    score: cosine_score(distance),
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.vector_ref.cmp(&b.vector_ref))
        });
        Ok(hits)
    }

    async fn delete(&self, namespace: &str, vector_refs: &[String]) -> Result<(), VectorDbError> {
        if vector_refs.is_empty() {
            return Ok(());
        }
        let Some(table) = self.open(namespace).await? else {
            return Ok(());
        };

        table
            .delete(&Self::refs_filter(vector_refs))
            .await
            .map_err(|e| VectorDbError::DeleteFailed(e.to_string()))?;

        tracing::debug!("Deleted {} vectors from '{}'", vector_refs.len(), namespace);
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), VectorDbError> {
        if !self.table_exists(namespace).await? {
            return Ok(());
        }
        self.connection
            .drop_table(namespace, &[])
            .await
            .map_err(|e| VectorDbError::DeleteFailed(format!("Failed to drop table: {}", e)))?;
        tracing::info!("Dropped LanceDB table '{}'", namespace);
        Ok(())
    }

    async fn count(&self, namespace: &str) -> Result<usize, VectorDbError> {
        let Some(table) = self.open(namespace).await? else {
            return Ok(0);
        };
        table
            .count_rows(None)
            .await
            .map_err(|e| VectorDbError::SearchFailed(format!("Failed to count rows: {}", e)))
    }
}
