// LanceDB is the default embedded vector database
pub mod lance_client;
pub use lance_client::LanceVectorDB;

// In-memory index for tests and ephemeral runs
pub mod memory;
pub use memory::MemoryVectorIndex;

use crate::config::StorageConfig;
use crate::error::VectorDbError;
use std::sync::Arc;

/// One stored embedding, keyed by `vector_ref` inside a namespace
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub vector_ref: String,
    pub vector: Vec<f32>,
    pub file_id: String,
    pub chunk_id: String,
}

/// A search hit: the stored reference and its similarity in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRef {
    pub vector_ref: String,
    pub chunk_id: String,
    pub file_id: String,
    pub score: f32,
}

/// Trait for namespaced vector storage
///
/// Every call names its namespace explicitly; there is no default namespace,
/// so one tenant's calls can never reach another tenant's vectors.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the namespace if needed and check its dimension
    async fn ensure_namespace(&self, namespace: &str, dimension: usize)
    -> Result<(), VectorDbError>;

    /// Insert or replace entries by `vector_ref`
    async fn upsert(
        &self,
        namespace: &str,
        entries: Vec<VectorEntry>,
    ) -> Result<usize, VectorDbError>;

    /// Nearest entries to `vector`, best first. A missing namespace yields no hits.
    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<ScoredRef>, VectorDbError>;

    /// Remove entries by reference; unknown references are ignored
    async fn delete(&self, namespace: &str, vector_refs: &[String]) -> Result<(), VectorDbError>;

    /// Remove the namespace and everything in it
    async fn drop_namespace(&self, namespace: &str) -> Result<(), VectorDbError>;

    /// Number of entries in the namespace (0 when missing)
    async fn count(&self, namespace: &str) -> Result<usize, VectorDbError>;
}

/// Build the vector backend named by the configuration
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn VectorIndex>, VectorDbError> {
    match config.vector_backend.as_str() {
        "memory" => Ok(Arc::new(MemoryVectorIndex::new())),
        "lancedb" => {
            let path = config.lancedb_path.to_string_lossy().to_string();
            Ok(Arc::new(LanceVectorDB::with_path(&path).await?))
        }
        other => Err(VectorDbError::InitializationFailed(format!(
            "unknown vector backend '{}'",
            other
        ))),
    }
}
