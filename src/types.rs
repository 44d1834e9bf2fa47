use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a tenant identifier
pub const MAX_TENANT_ID_LEN: usize = 64;

/// Opaque tenant identifier
///
/// Restricted to ASCII alphanumerics, `-` and `_` so it can be used verbatim
/// as a directory name, a lock key and a vector namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant identifier
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::Empty("tenant id".to_string()));
        }
        if value.len() > MAX_TENANT_ID_LEN {
            return Err(ValidationError::InvalidTenantId(format!(
                "'{}' is longer than {} characters",
                value, MAX_TENANT_ID_LEN
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidTenantId(format!(
                "'{}' may only contain ASCII letters, digits, '-' and '_'",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the vector index namespace owned by this tenant
    pub fn namespace(&self) -> String {
        format!("tenant_{}", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// Processing state of a single tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSyncState {
    Pending,
    Processing,
    Synced,
    Failed,
}

/// A source file tracked for a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub tenant_id: TenantId,
    /// Path relative to the tenant root, always `/`-separated
    pub relative_path: String,
    pub content_hash: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub sync_state: FileSyncState,
    /// Last per-file processing error, cleared on successful sync
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Set when the source file disappeared (soft delete)
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// File name component of the relative path
    pub fn filename(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// A bounded slice of a file's text, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    /// Key of the matching entry in the tenant's vector namespace
    pub vector_ref: String,
    /// Number of leading bytes of `text` repeated from the previous chunk
    #[serde(default)]
    pub overlap_len: usize,
}

/// Lifecycle status of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Coarse progress stage reported alongside the heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Queued,
    Listing,
    DetectingChanges,
    RemovingDeleted,
    ProcessingFiles,
    Finalizing,
    Done,
}

/// One run of the sync state machine for a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub tenant_id: TenantId,
    pub status: SyncStatus,
    pub force_full: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress_stage: SyncStage,
    pub progress_percentage: f32,
    pub current_file_index: usize,
    pub files_total: usize,
    pub files_processed: usize,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub chunks_updated: usize,
    pub chunks_deleted: usize,
    pub error_message: Option<String>,
}

impl SyncOperation {
    /// Create a new pending operation
    pub fn new(tenant_id: TenantId, force_full: bool) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            status: SyncStatus::Pending,
            force_full,
            created_at: now,
            started_at: None,
            heartbeat_at: now,
            finished_at: None,
            progress_stage: SyncStage::Queued,
            progress_percentage: 0.0,
            current_file_index: 0,
            files_total: 0,
            files_processed: 0,
            files_added: 0,
            files_updated: 0,
            files_deleted: 0,
            files_failed: 0,
            chunks_created: 0,
            chunks_updated: 0,
            chunks_deleted: 0,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the heartbeat has not advanced within `timeout`
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        !self.is_terminal() && now.signed_duration_since(self.heartbeat_at) > timeout
    }

    /// Move to a terminal status, stamping the finish time
    pub fn finish(&mut self, status: SyncStatus, error_message: Option<String>) {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.heartbeat_at = now;
        self.progress_stage = SyncStage::Done;
        if status == SyncStatus::Completed {
            self.progress_percentage = 100.0;
        }
        if error_message.is_some() {
            self.error_message = error_message;
        }
    }

    /// Recompute the percentage from the processed/total counters
    pub fn update_percentage(&mut self) {
        self.progress_percentage = if self.files_total == 0 {
            100.0
        } else {
            (self.files_processed as f32 / self.files_total as f32 * 100.0).min(100.0)
        };
    }
}

/// A cited passage in a query answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub filename: String,
    pub score: f32,
    pub excerpt: String,
}

/// Which retrieval path served a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalBackend {
    Vector,
    Keyword,
}

/// Immutable outcome of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_text: String,
    pub answer: String,
    /// Ordered by descending relevance
    pub sources: Vec<SourceRef>,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub processing_time_ms: u64,
    pub retrieval_backend: RetrievalBackend,
}

/// Counts of tracked files and chunks for a tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStats {
    pub files_total: usize,
    pub files_synced: usize,
    pub files_failed: usize,
    pub files_pending: usize,
    pub files_deleted: usize,
    pub total_chunks: usize,
    pub last_sync: Option<SyncStatus>,
}
