//! Centralized error types for tenant-rag using thiserror
//!
//! Errors are grouped per subsystem and wrapped by [`RagError`]. The sync
//! orchestrator relies on [`RagError::is_systemic`] to tell a per-file failure
//! apart from one that must abort the whole operation.

use thiserror::Error;

/// Main error type for the RAG system
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector database error: {0}")]
    VectorDb(#[from] VectorDbError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result alias used across the library
pub type RagResult<T> = std::result::Result<T, RagError>;

/// Errors related to embedding generation
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    InitializationFailed(String),

    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),

    #[error("Embedding backend is unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Embedding generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Errors related to vector index operations
#[derive(Error, Debug)]
pub enum VectorDbError {
    #[error("Failed to initialize vector database: {0}")]
    InitializationFailed(String),

    #[error("Failed to connect to vector database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create namespace '{namespace}': {reason}")]
    NamespaceCreationFailed { namespace: String, reason: String },

    #[error("Namespace '{0}' not found")]
    NamespaceNotFound(String),

    #[error("Failed to store embeddings: {0}")]
    StoreFailed(String),

    #[error("Failed to search embeddings: {0}")]
    SearchFailed(String),

    #[error("Failed to delete embeddings: {0}")]
    DeleteFailed(String),

    #[error("Invalid embedding dimension for namespace '{namespace}': expected {expected}, got {actual}")]
    DimensionMismatch {
        namespace: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors related to reading and listing tenant files
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Failed to walk directory: {0}")]
    WalkFailed(String),

    #[error("Failed to read file '{file}': {reason}")]
    FileReadFailed { file: String, reason: String },

    #[error("File is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("Failed to extract text from '{file}': {reason}")]
    ExtractionFailed { file: String, reason: String },
}

/// Errors related to text chunking
#[derive(Error, Debug)]
pub enum ChunkingError {
    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid chunk overlap {overlap} for chunk size {size}")]
    InvalidOverlap { size: usize, overlap: usize },
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Errors related to input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Path does not exist: {0}")]
    PathNotFound(String),

    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    #[error("{field} must be {constraint}, got {actual}")]
    ConstraintViolation {
        field: String,
        constraint: String,
        actual: String,
    },

    #[error("Empty {0}")]
    Empty(String),
}

/// Errors related to the persisted catalog (file records, chunks, sync operations)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to load state from '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Failed to save state to '{path}': {reason}")]
    SaveFailed { path: String, reason: String },

    #[error("Sync operation not found: {0}")]
    OperationNotFound(String),

    #[error("File record not found: {0}")]
    FileNotFound(String),
}

/// Errors related to sync lifecycle management
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Tenant '{0}' is being synced by another process")]
    LockedByAnotherProcess(String),

    #[error("A sync is running for tenant '{0}'")]
    SyncInProgress(String),

    #[error("Failed to acquire tenant lock: {0}")]
    LockFailed(String),
}

/// Errors raised when no retrieval path could serve a query
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("All retrieval backends failed (vector: {vector}; keyword: {keyword})")]
    AllBackendsFailed { vector: String, keyword: String },

    #[error("Keyword index error: {0}")]
    KeywordIndex(String),
}

/// Errors related to answer generation
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation backend request failed: {0}")]
    RequestFailed(String),

    #[error("Generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid response from generation backend: {0}")]
    InvalidResponse(String),

    #[error("Generation backend is not configured: {0}")]
    NotConfigured(String),
}

// Conversion from anyhow::Error to RagError
impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::Other(format!("{:#}", err))
    }
}

impl RagError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        RagError::Other(msg.into())
    }

    /// Check if this is a user error (validation, bad configuration) vs system error
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RagError::Validation(_) | RagError::Config(ConfigError::InvalidValue { .. })
        )
    }

    /// Check if this error is worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::VectorDb(_)
                | RagError::Embedding(EmbeddingError::Timeout(_))
                | RagError::Embedding(EmbeddingError::GenerationFailed(_))
                | RagError::Embedding(EmbeddingError::BackendUnavailable(_))
                | RagError::Io(_)
        )
    }

    /// Check if this error means a backend is down for the whole operation
    ///
    /// Systemic errors abort a sync; everything else only fails the current file.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            RagError::VectorDb(VectorDbError::ConnectionFailed(_))
                | RagError::Embedding(EmbeddingError::BackendUnavailable(_))
        )
    }
}
