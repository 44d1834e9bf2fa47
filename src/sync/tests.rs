use super::*;
use crate::bm25_search::KeywordIndexes;
use crate::config::Config;
use crate::embedding::{EmbeddingProvider, HashingEmbedder};
use crate::error::{EmbeddingError, RagError, SyncError, ValidationError, VectorDbError};
use crate::store::StateStore;
use crate::types::{FileSyncState, SyncOperation, SyncStatus, TenantId};
use crate::vector_db::{MemoryVectorIndex, ScoredRef, VectorEntry, VectorIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    tenant: TenantId,
    backends: SyncBackends,
    orchestrator: SyncOrchestrator,
}

impl Fixture {
    fn new() -> Self {
        Self::with(
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(MemoryVectorIndex::new()),
            None,
        )
    }

    fn with(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        state_dir: Option<PathBuf>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let tenants_root = dir.path().join("tenants");
        let tenant = TenantId::parse("acme").unwrap();
        let root = tenants_root.join("acme");
        std::fs::create_dir_all(&root).unwrap();

        let mut config = Config::ephemeral(&tenants_root);
        config.chunking.chunk_size = 120;
        config.chunking.chunk_overlap = 20;
        config.sync.retry_base_delay_ms = 1;

        let backends = SyncBackends {
            store: Arc::new(StateStore::new(state_dir)),
            vectors,
            keywords: Arc::new(KeywordIndexes::new(None)),
            embedder,
        };
        let orchestrator = SyncOrchestrator::new(backends.clone(), &config).unwrap();

        Self {
            _dir: dir,
            root,
            tenant,
            backends,
            orchestrator,
        }
    }

    fn write(&self, name: &str, content: impl AsRef<[u8]>) {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    async fn sync(&self, force_full: bool) -> SyncOperation {
        let id = self
            .orchestrator
            .trigger(&self.tenant, force_full)
            .await
            .unwrap();
        self.orchestrator.wait(&self.tenant, &id).await.unwrap()
    }

    async fn vector_count(&self) -> usize {
        self.backends
            .vectors
            .count(&self.tenant.namespace())
            .await
            .unwrap()
    }
}

fn paragraph(topic: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("The {} rule number {} applies to everyone.", topic, i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Embedder that sleeps before every batch
struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl EmbeddingProvider for SlowEmbedder {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        std::thread::sleep(self.delay);
        self.inner.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Embedder whose first `failures` calls fail
struct FlakyEmbedder {
    inner: HashingEmbedder,
    failures: usize,
    calls: AtomicUsize,
}

impl EmbeddingProvider for FlakyEmbedder {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(EmbeddingError::GenerationFailed("transient".to_string()));
        }
        self.inner.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

/// Vector index that accepts namespaces but cannot write
struct UnreachableVectorIndex;

#[async_trait::async_trait]
impl VectorIndex for UnreachableVectorIndex {
    async fn ensure_namespace(&self, _: &str, _: usize) -> Result<(), VectorDbError> {
        Ok(())
    }

    async fn upsert(&self, _: &str, _: Vec<VectorEntry>) -> Result<usize, VectorDbError> {
        Err(VectorDbError::ConnectionFailed("connection refused".to_string()))
    }

    async fn query(&self, _: &str, _: Vec<f32>, _: usize) -> Result<Vec<ScoredRef>, VectorDbError> {
        Err(VectorDbError::ConnectionFailed("connection refused".to_string()))
    }

    async fn delete(&self, _: &str, _: &[String]) -> Result<(), VectorDbError> {
        Ok(())
    }

    async fn drop_namespace(&self, _: &str) -> Result<(), VectorDbError> {
        Ok(())
    }

    async fn count(&self, _: &str) -> Result<usize, VectorDbError> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_first_sync_indexes_every_file() {
    let fx = Fixture::new();
    fx.write("mission.txt", paragraph("mission", 3));
    fx.write("policy.txt", paragraph("vacation", 6));
    fx.write("docs/handbook.txt", paragraph("parking", 2));

    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.files_total, 3);
    assert_eq!(op.files_processed, 3);
    assert_eq!(op.files_added, 3);
    assert_eq!(op.files_failed, 0);
    assert_eq!(op.progress_percentage, 100.0);
    assert!(op.started_at.is_some() && op.finished_at.is_some());

    let stats = fx.backends.store.stats(&fx.tenant).await.unwrap();
    assert_eq!(stats.files_synced, 3);
    assert_eq!(stats.total_chunks, op.chunks_created);
    assert_eq!(fx.vector_count().await, op.chunks_created);
}

#[tokio::test]
async fn test_resync_without_changes_does_nothing() {
    let fx = Fixture::new();
    fx.write("a.txt", paragraph("alpha", 2));
    fx.sync(false).await;

    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.files_total, 0);
    assert_eq!(op.files_processed, 0);
    assert_eq!(op.chunks_created + op.chunks_updated + op.chunks_deleted, 0);
}

#[tokio::test]
async fn test_edit_replaces_all_chunks() {
    let fx = Fixture::new();
    fx.write("policy.txt", paragraph("vacation", 12));
    let first = fx.sync(false).await;
    let old_record = fx
        .backends
        .store
        .record(&fx.tenant, "policy.txt")
        .await
        .unwrap()
        .unwrap();
    let old_chunks = fx
        .backends
        .store
        .chunks_for_file(&fx.tenant, &old_record.id)
        .await
        .unwrap();
    assert!(old_chunks.len() > 1);

    fx.write("policy.txt", "Vacation is now unlimited.");
    let op = fx.sync(false).await;
    assert_eq!(op.files_updated, 1);
    assert_eq!(op.files_added, 0);
    assert_eq!(op.chunks_updated, 1);
    assert_eq!(op.chunks_deleted, first.chunks_created);

    let record = fx
        .backends
        .store
        .record(&fx.tenant, "policy.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.id, old_record.id);
    assert_ne!(record.content_hash, old_record.content_hash);
    assert_eq!(record.chunk_count, 1);

    let old_ids: Vec<String> = old_chunks.iter().map(|c| c.id.clone()).collect();
    assert!(
        fx.backends
            .store
            .chunk_views(&fx.tenant, &old_ids)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(fx.vector_count().await, 1);
}

#[tokio::test]
async fn test_deleted_file_is_removed_everywhere() {
    let fx = Fixture::new();
    fx.write("keep.txt", paragraph("keep", 2));
    fx.write("gone.txt", paragraph("obsolete", 2));
    let first = fx.sync(false).await;

    std::fs::remove_file(fx.root.join("gone.txt")).unwrap();
    let op = fx.sync(false).await;
    assert_eq!(op.files_deleted, 1);
    assert_eq!(op.files_processed, 1);
    assert!(op.chunks_deleted > 0);

    let records = fx.backends.store.active_records(&fx.tenant).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].relative_path, "keep.txt");
    let tombstones = fx.backends.store.tombstones(&fx.tenant).await.unwrap();
    assert_eq!(tombstones[0].relative_path, "gone.txt");

    assert_eq!(
        fx.vector_count().await,
        first.chunks_created - op.chunks_deleted
    );
    let keyword = fx.backends.keywords.for_tenant(&fx.tenant).unwrap();
    assert!(keyword.search("obsolete", 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_file_does_not_abort_sync() {
    let fx = Fixture::new();
    fx.write("a.txt", paragraph("alpha", 2));
    fx.write("b.txt", paragraph("beta", 2));
    fx.write("corrupt.txt", [0x66u8, 0x6f, 0xff, 0xfe, 0x6f]);
    fx.write("d.txt", paragraph("delta", 2));

    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.files_processed, 4);
    assert_eq!(op.files_failed, 1);
    assert_eq!(op.files_added, 3);

    let records = fx.backends.store.active_records(&fx.tenant).await.unwrap();
    let failed: Vec<_> = records
        .iter()
        .filter(|r| r.sync_state == FileSyncState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].relative_path, "corrupt.txt");
    assert!(failed[0].error_message.as_deref().unwrap().contains("UTF-8"));
    assert_eq!(
        records
            .iter()
            .filter(|r| r.sync_state == FileSyncState::Synced)
            .count(),
        3
    );

    // A failed file is retried on the next sync even though it did not change
    let retry = fx.sync(false).await;
    assert_eq!(retry.files_total, 1);
    assert_eq!(retry.files_failed, 1);
}

#[tokio::test]
async fn test_empty_file_is_synced_with_zero_chunks() {
    let fx = Fixture::new();
    fx.write("empty.txt", "");

    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.files_added, 1);
    assert_eq!(op.chunks_created, 0);

    let record = fx
        .backends
        .store
        .record(&fx.tenant, "empty.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.sync_state, FileSyncState::Synced);
    assert_eq!(record.chunk_count, 0);
}

#[tokio::test]
async fn test_force_full_reprocesses_unchanged_files() {
    let fx = Fixture::new();
    fx.write("a.txt", paragraph("alpha", 2));
    fx.write("b.txt", paragraph("beta", 2));
    let first = fx.sync(false).await;

    let op = fx.sync(true).await;
    assert!(op.force_full);
    assert_eq!(op.files_updated, 2);
    assert_eq!(op.chunks_deleted, first.chunks_created);
    assert_eq!(fx.vector_count().await, first.chunks_created);
}

#[tokio::test]
async fn test_second_trigger_returns_running_sync() {
    let fx = Fixture::with(
        Arc::new(SlowEmbedder {
            inner: HashingEmbedder::new(32),
            delay: Duration::from_millis(100),
        }),
        Arc::new(MemoryVectorIndex::new()),
        None,
    );
    for i in 0..3 {
        fx.write(&format!("f{}.txt", i), paragraph("slow", 1));
    }

    let first = fx.orchestrator.trigger(&fx.tenant, false).await.unwrap();
    let second = fx.orchestrator.trigger(&fx.tenant, false).await.unwrap();
    assert_eq!(first, second);
    assert!(fx.orchestrator.is_running(&fx.tenant).await);

    let active = fx
        .backends
        .store
        .active_operation(&fx.tenant)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, first);

    let done = fx.orchestrator.wait(&fx.tenant, &first).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);
    assert!(!fx.orchestrator.is_running(&fx.tenant).await);
}

#[tokio::test]
async fn test_cancel_stops_at_file_boundary() {
    let fx = Fixture::with(
        Arc::new(SlowEmbedder {
            inner: HashingEmbedder::new(32),
            delay: Duration::from_millis(100),
        }),
        Arc::new(MemoryVectorIndex::new()),
        None,
    );
    for i in 0..5 {
        fx.write(&format!("f{}.txt", i), paragraph("cancel", 1));
    }

    let id = fx.orchestrator.trigger(&fx.tenant, false).await.unwrap();
    assert_eq!(
        fx.orchestrator.cancel(&fx.tenant).await.as_deref(),
        Some(id.as_str())
    );

    let op = fx.orchestrator.wait(&fx.tenant, &id).await.unwrap();
    assert_eq!(op.status, SyncStatus::Cancelled);
    assert!(op.files_processed < 5);

    // Whatever was processed before the boundary stays committed
    let stats = fx.backends.store.stats(&fx.tenant).await.unwrap();
    assert_eq!(stats.files_synced, op.files_added);
}

#[tokio::test]
async fn test_unreachable_vector_index_fails_sync() {
    let fx = Fixture::with(
        Arc::new(HashingEmbedder::new(32)),
        Arc::new(UnreachableVectorIndex),
        None,
    );
    fx.write("a.txt", paragraph("alpha", 2));
    fx.write("b.txt", paragraph("beta", 2));

    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Failed);
    assert!(
        op.error_message
            .as_deref()
            .unwrap()
            .contains("connection refused")
    );
    assert_eq!(op.files_processed, 0);
}

#[tokio::test]
async fn test_transient_embedding_errors_are_retried() {
    let fx = Fixture::with(
        Arc::new(FlakyEmbedder {
            inner: HashingEmbedder::new(32),
            failures: 2,
            calls: AtomicUsize::new(0),
        }),
        Arc::new(MemoryVectorIndex::new()),
        None,
    );
    fx.write("a.txt", paragraph("alpha", 2));

    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.files_failed, 0);
    assert_eq!(op.files_added, 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_only_the_file() {
    let fx = Fixture::with(
        Arc::new(FlakyEmbedder {
            inner: HashingEmbedder::new(32),
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        }),
        Arc::new(MemoryVectorIndex::new()),
        None,
    );
    fx.write("a.txt", paragraph("alpha", 2));
    fx.write("b.txt", paragraph("beta", 2));

    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.files_failed, 2);
    assert_eq!(op.files_processed, 2);
}

#[tokio::test]
async fn test_missing_root_is_rejected() {
    let fx = Fixture::new();
    let other = TenantId::parse("nobody").unwrap();
    let result = fx.orchestrator.trigger(&other, false).await;
    assert!(matches!(
        result,
        Err(RagError::Validation(ValidationError::PathNotFound(_)))
    ));
    assert!(
        fx.backends
            .store
            .latest_operation(&other)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_status_expires_dead_operation() {
    let fx = Fixture::new();
    let mut dead = SyncOperation::new(fx.tenant.clone(), false);
    dead.status = SyncStatus::Running;
    dead.heartbeat_at = chrono::Utc::now() - chrono::Duration::hours(1);
    fx.backends
        .store
        .begin_operation(&fx.tenant, dead.clone(), chrono::Duration::hours(2))
        .await
        .unwrap();

    let status = fx.orchestrator.status(&fx.tenant).await.unwrap().unwrap();
    assert_eq!(status.id, dead.id);
    assert_eq!(status.status, SyncStatus::Failed);
    assert_eq!(status.error_message.as_deref(), Some("heartbeat timeout"));

    let by_id = fx.orchestrator.status_by_id(&dead.id).await.unwrap().unwrap();
    assert_eq!(by_id.status, SyncStatus::Failed);
    assert!(fx.orchestrator.status_by_id("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_trigger_supersedes_orphaned_operation() {
    let fx = Fixture::new();
    fx.write("a.txt", paragraph("alpha", 1));
    let orphan = SyncOperation::new(fx.tenant.clone(), false);
    fx.backends
        .store
        .begin_operation(&fx.tenant, orphan.clone(), chrono::Duration::hours(1))
        .await
        .unwrap();

    let op = fx.sync(false).await;
    assert_ne!(op.id, orphan.id);
    assert_eq!(op.status, SyncStatus::Completed);

    let old = fx
        .backends
        .store
        .get_operation(&fx.tenant, &orphan.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, SyncStatus::Failed);
}

#[tokio::test]
async fn test_lock_held_by_another_process_is_reported() {
    let state = TempDir::new().unwrap();
    let fx = Fixture::with(
        Arc::new(HashingEmbedder::new(32)),
        Arc::new(MemoryVectorIndex::new()),
        Some(state.path().to_path_buf()),
    );
    fx.write("a.txt", paragraph("alpha", 1));

    let _held = FsLockGuard::try_acquire(state.path(), &fx.tenant)
        .unwrap()
        .unwrap();
    let result = fx.orchestrator.trigger(&fx.tenant, false).await;
    assert!(matches!(
        result,
        Err(RagError::Sync(SyncError::LockedByAnotherProcess(_)))
    ));
}

#[tokio::test]
async fn test_persistent_state_survives_restart() {
    let state = TempDir::new().unwrap();
    let fx = Fixture::with(
        Arc::new(HashingEmbedder::new(32)),
        Arc::new(MemoryVectorIndex::new()),
        Some(state.path().to_path_buf()),
    );
    fx.write("a.txt", paragraph("alpha", 1));
    let op = fx.sync(false).await;
    assert_eq!(op.status, SyncStatus::Completed);

    let reopened = StateStore::new(Some(state.path().to_path_buf()));
    let found = reopened.find_operation(&op.id).await.unwrap().unwrap();
    assert_eq!(found.status, SyncStatus::Completed);
    assert_eq!(reopened.active_records(&fx.tenant).await.unwrap().len(), 1);
    assert!(!Path::new(&state.path().join("acme").join("catalog.json.tmp")).exists());

    let record = &reopened.active_records(&fx.tenant).await.unwrap()[0];
    let chunks = reopened
        .chunks_for_file(&fx.tenant, &record.id)
        .await
        .unwrap();
    assert_eq!(chunks.len(), record.chunk_count);
    let catalog = std::fs::read_to_string(state.path().join("acme").join("catalog.json")).unwrap();
    assert!(!catalog.contains(&chunks[0].text));
}

#[tokio::test]
async fn test_idle_lock_holds_back_trigger_for_same_tenant_only() {
    let fx = Fixture::new();
    fx.write("a.txt", paragraph("alpha", 1));
    let globex = TenantId::parse("globex").unwrap();
    let globex_root = fx.root.parent().unwrap().join("globex");
    std::fs::create_dir_all(&globex_root).unwrap();
    std::fs::write(globex_root.join("b.txt"), paragraph("beta", 1)).unwrap();

    let idle = fx.orchestrator.lock_idle(&fx.tenant).await.unwrap();

    // Another tenant is not held back
    let other = tokio::time::timeout(
        Duration::from_secs(5),
        fx.orchestrator.trigger(&globex, false),
    )
    .await
    .expect("trigger for another tenant waited on the lock")
    .unwrap();
    let op = fx.orchestrator.wait(&globex, &other).await.unwrap();
    assert_eq!(op.status, SyncStatus::Completed);

    let orchestrator = fx.orchestrator.clone();
    let tenant = fx.tenant.clone();
    let pending = tokio::spawn(async move { orchestrator.trigger(&tenant, false).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    assert!(!fx.orchestrator.is_running(&fx.tenant).await);

    drop(idle);
    let id = pending.await.unwrap().unwrap();
    let op = fx.orchestrator.wait(&fx.tenant, &id).await.unwrap();
    assert_eq!(op.status, SyncStatus::Completed);
}

#[tokio::test]
async fn test_idle_lock_is_refused_while_syncing() {
    let fx = Fixture::with(
        Arc::new(SlowEmbedder {
            inner: HashingEmbedder::new(32),
            delay: Duration::from_millis(100),
        }),
        Arc::new(MemoryVectorIndex::new()),
        None,
    );
    fx.write("a.txt", paragraph("busy", 1));

    let id = fx.orchestrator.trigger(&fx.tenant, false).await.unwrap();
    let result = fx.orchestrator.lock_idle(&fx.tenant).await;
    assert!(matches!(
        result,
        Err(RagError::Sync(SyncError::SyncInProgress(_)))
    ));

    fx.orchestrator.wait(&fx.tenant, &id).await.unwrap();
    assert!(fx.orchestrator.lock_idle(&fx.tenant).await.is_ok());
}
