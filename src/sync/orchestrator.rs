//! Per-tenant delta sync state machine
//!
//! `trigger` records a pending [`SyncOperation`] and spawns a task that moves
//! it through `running` to a terminal status. Files are handled one at a
//! time in path order; a failing file is marked failed and skipped, while a
//! systemic error (backend unreachable after retries) fails the operation.
//! Already applied files stay committed either way.

use super::detector::ChangeDetector;
use super::fs_lock::FsLockGuard;
use super::registry::{SyncGuard, SyncRegistry};
use crate::bm25_search::{BM25Search, KeywordIndexes};
use crate::config::{ChunkingConfig, Config, SyncConfig, TenantsConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{IndexingError, RagError, RagResult, SyncError, ValidationError};
use crate::indexer::{Chunker, FileWalker, ListedFile, PathFilter, TextChunk, extract_text};
use crate::store::{BeginOutcome, StateStore};
use crate::types::{
    Chunk, FileRecord, FileSyncState, SyncOperation, SyncStage, SyncStatus, TenantId,
};
use crate::vector_db::{VectorEntry, VectorIndex};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared backends a sync reads from and writes to
#[derive(Clone)]
pub struct SyncBackends {
    pub store: Arc<StateStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub keywords: Arc<KeywordIndexes>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

enum SyncEnd {
    Completed,
    Cancelled,
}

/// What happened to one entry of the change set
enum FileOutcome {
    Added { chunks: usize },
    Updated { chunks: usize, replaced: usize },
    Deleted { chunks: usize },
    Failed,
}

struct FileWrite {
    chunks: usize,
    replaced: usize,
}

struct Inner {
    backends: SyncBackends,
    registry: SyncRegistry,
    tenants: TenantsConfig,
    chunking: ChunkingConfig,
    sync: SyncConfig,
    chunker: Chunker,
    filter: PathFilter,
    batch_size: usize,
    embed_timeout: Duration,
    /// Per-tenant locks serializing the check-then-register step of triggers
    /// with purges
    tenant_locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

/// Coordinates change detection, chunking, embedding and index writes
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(backends: SyncBackends, config: &Config) -> RagResult<Self> {
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        let filter = PathFilter::new(
            &config.chunking.include_patterns,
            &config.chunking.exclude_patterns,
        )?;

        Ok(Self {
            inner: Arc::new(Inner {
                backends,
                registry: SyncRegistry::new(),
                tenants: config.tenants.clone(),
                chunking: config.chunking.clone(),
                sync: config.sync.clone(),
                chunker,
                filter,
                batch_size: config.embedding.batch_size.max(1),
                embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
                tenant_locks: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn tenant_root(&self, tenant: &TenantId) -> PathBuf {
        self.inner.tenants.root_for(tenant)
    }

    fn store(&self) -> &StateStore {
        &self.inner.backends.store
    }

    async fn tenant_lock(&self, tenant: &TenantId) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .tenant_locks
            .lock()
            .await
            .entry(tenant.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Keep `tenant` free of new syncs while the guard lives
    ///
    /// Fails if a sync of the tenant is running in this process.
    pub async fn lock_idle(&self, tenant: &TenantId) -> RagResult<OwnedMutexGuard<()>> {
        let guard = self.tenant_lock(tenant).await;
        if self.is_running(tenant).await {
            return Err(SyncError::SyncInProgress(tenant.to_string()).into());
        }
        Ok(guard)
    }

    /// Start a sync for `tenant`, returning the id of the operation
    ///
    /// If a live sync is already running its id is returned instead and no
    /// second operation is created. A running sync whose heartbeat went stale
    /// is cancelled and superseded; its record is kept as failed.
    pub async fn trigger(&self, tenant: &TenantId, force_full: bool) -> RagResult<String> {
        let root = self.tenant_root(tenant);
        if !root.is_dir() {
            return Err(ValidationError::PathNotFound(root.display().to_string()).into());
        }

        let _serial = self.tenant_lock(tenant).await;
        let timeout = self.inner.sync.heartbeat_timeout();

        let current = self.inner.registry.current(tenant).await;
        if let Some(running) = &current {
            if let Some(op) = self.store().get_operation(tenant, &running.sync_id).await? {
                if !op.is_terminal() && !op.is_stale(Utc::now(), timeout) {
                    tracing::info!("Sync {} already running for tenant '{}'", op.id, tenant);
                    return Ok(op.id);
                }
                if !op.is_terminal() {
                    tracing::warn!(
                        "Superseding stalled sync {} for tenant '{}'",
                        op.id,
                        tenant
                    );
                }
            }
            self.inner.registry.evict(tenant, &running.sync_id).await;
        }

        let fs_lock = match self.store().base_dir() {
            Some(dir) => match FsLockGuard::try_acquire(dir, tenant)? {
                Some(lock) => Some(lock),
                None => return Err(SyncError::LockedByAnotherProcess(tenant.to_string()).into()),
            },
            None => None,
        };

        // Another process may have synced this tenant since we cached it
        if current.is_none() {
            self.store().reload(tenant).await;
        }

        let op = self.begin(tenant, force_full, timeout).await?;
        let guard = self.inner.registry.register(tenant, &op.id, fs_lock).await;
        tracing::info!(
            "Queued sync {} for tenant '{}' (force_full: {})",
            op.id,
            tenant,
            force_full
        );

        let this = self.clone();
        let task_tenant = tenant.clone();
        tokio::spawn(async move { this.run(task_tenant, root, force_full, guard).await });

        Ok(op.id)
    }

    async fn begin(
        &self,
        tenant: &TenantId,
        force_full: bool,
        timeout: chrono::Duration,
    ) -> RagResult<SyncOperation> {
        let op = SyncOperation::new(tenant.clone(), force_full);
        match self.store().begin_operation(tenant, op.clone(), timeout).await? {
            BeginOutcome::Started(op) => Ok(op),
            BeginOutcome::Active(orphan) => {
                // Nothing in this process runs it and we hold the tenant lock,
                // so its owner is gone
                tracing::warn!(
                    "Sync {} for tenant '{}' has no live owner, marking failed",
                    orphan.id,
                    tenant
                );
                self.store()
                    .fail_active(tenant, "abandoned by a previous process")
                    .await?;
                match self.store().begin_operation(tenant, op, timeout).await? {
                    BeginOutcome::Started(op) => Ok(op),
                    BeginOutcome::Active(_) => {
                        Err(SyncError::SyncInProgress(tenant.to_string()).into())
                    }
                }
            }
        }
    }

    /// Latest operation of a tenant, expiring it first if its heartbeat is stale
    pub async fn status(&self, tenant: &TenantId) -> RagResult<Option<SyncOperation>> {
        self.expire_if_stale(tenant).await?;
        Ok(self.store().latest_operation(tenant).await?)
    }

    /// Operation by id across tenants, with the same stale check
    pub async fn status_by_id(&self, sync_id: &str) -> RagResult<Option<SyncOperation>> {
        let Some(op) = self.store().find_operation(sync_id).await? else {
            return Ok(None);
        };
        if op.is_terminal() {
            return Ok(Some(op));
        }
        self.expire_if_stale(&op.tenant_id).await?;
        Ok(self.store().get_operation(&op.tenant_id, sync_id).await?)
    }

    async fn expire_if_stale(&self, tenant: &TenantId) -> RagResult<()> {
        let timeout = self.inner.sync.heartbeat_timeout();
        if let Some(expired) = self.store().expire_stale(tenant, timeout).await? {
            tracing::warn!(
                "Sync {} for tenant '{}' missed its heartbeat, marked failed",
                expired.id,
                tenant
            );
            self.inner.registry.evict(tenant, &expired.id).await;
        }
        Ok(())
    }

    /// Wait until `sync_id` reaches a terminal status
    pub async fn wait(&self, tenant: &TenantId, sync_id: &str) -> RagResult<SyncOperation> {
        loop {
            let rx = self.inner.registry.subscribe(tenant, sync_id).await;

            let op = self
                .store()
                .get_operation(tenant, sync_id)
                .await?
                .ok_or_else(|| RagError::other(format!("Unknown sync operation: {}", sync_id)))?;
            if op.is_terminal() {
                return Ok(op);
            }

            let Some(mut rx) = rx else {
                // No task owns it; only a stale heartbeat can end it now
                self.expire_if_stale(tenant).await?;
                let op = self.store().get_operation(tenant, sync_id).await?;
                match op {
                    Some(op) if op.is_terminal() => return Ok(op),
                    _ => {
                        tokio::time::sleep(self.inner.sync.heartbeat_interval()).await;
                        continue;
                    }
                }
            };

            match rx.recv().await {
                Ok(op) => return Ok(op),
                Err(broadcast::error::RecvError::Lagged(_))
                | Err(broadcast::error::RecvError::Closed) => continue,
            }
        }
    }

    /// Request cancellation of the tenant's running sync
    ///
    /// Honored at the next file boundary. Returns the id of the sync that was
    /// asked to stop, if any.
    pub async fn cancel(&self, tenant: &TenantId) -> Option<String> {
        let cancelled = self.inner.registry.cancel(tenant).await;
        if let Some(id) = &cancelled {
            tracing::info!("Cancellation requested for sync {} of tenant '{}'", id, tenant);
        }
        cancelled
    }

    pub async fn is_running(&self, tenant: &TenantId) -> bool {
        self.inner.registry.is_running(tenant).await
    }

    // ---- the sync task ----

    async fn run(self, tenant: TenantId, root: PathBuf, force_full: bool, guard: SyncGuard) {
        let sync_id = guard.sync_id().to_string();
        let cancel = guard.cancellation_token();
        let stop_heartbeat = CancellationToken::new();
        let heartbeat = self.spawn_heartbeat(&tenant, &sync_id, stop_heartbeat.clone());

        let worker = {
            let this = self.clone();
            let tenant = tenant.clone();
            let sync_id = sync_id.clone();
            tokio::spawn(async move {
                this.execute(&tenant, &sync_id, &root, force_full, &cancel)
                    .await
            })
        };
        let outcome = match worker.await {
            Ok(outcome) => outcome,
            Err(e) => Err(RagError::other(format!("sync task panicked: {}", e))),
        };

        stop_heartbeat.cancel();
        let _ = heartbeat.await;

        let outcome = match (outcome, self.store().flush(&tenant).await) {
            (Ok(_), Err(e)) => Err(e.into()),
            (outcome, flushed) => {
                if let Err(e) = flushed {
                    tracing::error!("Failed to save catalog of tenant '{}': {}", tenant, e);
                }
                outcome
            }
        };

        let (status, error) = match outcome {
            Ok(SyncEnd::Completed) => (SyncStatus::Completed, None),
            Ok(SyncEnd::Cancelled) => (SyncStatus::Cancelled, None),
            Err(e) => {
                tracing::error!("Sync {} for tenant '{}' failed: {}", sync_id, tenant, e);
                (SyncStatus::Failed, Some(e.to_string()))
            }
        };

        let finished = self
            .store()
            .update_operation(&tenant, &sync_id, |op| {
                if !op.is_terminal() {
                    op.finish(status, error);
                }
            })
            .await;

        match finished {
            Ok(op) => {
                tracing::info!(
                    "Sync {} for tenant '{}' {}: {} added, {} updated, {} deleted, {} failed",
                    op.id,
                    tenant,
                    op.status,
                    op.files_added,
                    op.files_updated,
                    op.files_deleted,
                    op.files_failed
                );
                guard.complete(&op).await;
            }
            Err(e) => {
                tracing::error!("Failed to record the end of sync {}: {}", sync_id, e);
                guard.release().await;
            }
        }
    }

    fn spawn_heartbeat(
        &self,
        tenant: &TenantId,
        sync_id: &str,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.inner.backends.store.clone();
        let interval = self.inner.sync.heartbeat_interval();
        let tenant = tenant.clone();
        let sync_id = sync_id.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let beat = store
                            .update_operation(&tenant, &sync_id, |op| {
                                if !op.is_terminal() {
                                    op.heartbeat_at = Utc::now();
                                }
                            })
                            .await;
                        if let Err(e) = beat {
                            tracing::debug!("Heartbeat for sync {} stopped: {}", sync_id, e);
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Apply `f` to the operation and advance its heartbeat
    async fn progress<F>(&self, tenant: &TenantId, sync_id: &str, f: F) -> RagResult<SyncOperation>
    where
        F: FnOnce(&mut SyncOperation),
    {
        Ok(self
            .store()
            .update_operation(tenant, sync_id, |op| {
                f(op);
                op.heartbeat_at = Utc::now();
            })
            .await?)
    }

    async fn record_outcome(
        &self,
        tenant: &TenantId,
        sync_id: &str,
        index: usize,
        outcome: FileOutcome,
    ) -> RagResult<()> {
        self.store().flush(tenant).await?;
        self.progress(tenant, sync_id, |op| {
            match outcome {
                FileOutcome::Added { chunks } => {
                    op.files_added += 1;
                    op.chunks_created += chunks;
                }
                FileOutcome::Updated { chunks, replaced } => {
                    op.files_updated += 1;
                    op.chunks_updated += chunks;
                    op.chunks_deleted += replaced;
                }
                FileOutcome::Deleted { chunks } => {
                    op.files_deleted += 1;
                    op.chunks_deleted += chunks;
                }
                FileOutcome::Failed => op.files_failed += 1,
            }
            op.files_processed += 1;
            op.current_file_index = index;
            op.update_percentage();
        })
        .await?;
        Ok(())
    }

    async fn execute(
        &self,
        tenant: &TenantId,
        sync_id: &str,
        root: &Path,
        force_full: bool,
        cancel: &CancellationToken,
    ) -> RagResult<SyncEnd> {
        self.progress(tenant, sync_id, |op| {
            op.status = SyncStatus::Running;
            op.started_at = Some(Utc::now());
            op.progress_stage = SyncStage::Listing;
        })
        .await?;
        tracing::info!("Sync {} started for tenant '{}' in {:?}", sync_id, tenant, root);

        let walker = FileWalker::new(root, self.inner.chunking.max_file_size)
            .with_filter(self.inner.filter.clone());
        let listing = tokio::task::spawn_blocking(move || walker.list())
            .await
            .map_err(|e| RagError::other(format!("listing task failed: {}", e)))??;

        self.progress(tenant, sync_id, |op| {
            op.progress_stage = SyncStage::DetectingChanges;
        })
        .await?;
        let records = self.store().active_records(tenant).await?;
        let changes = ChangeDetector::new()
            .force_full(force_full)
            .detect(&listing, &records);
        tracing::info!(
            "Tenant '{}': {} created, {} updated, {} deleted, {} unchanged",
            tenant,
            changes.created.len(),
            changes.updated.len(),
            changes.deleted.len(),
            changes.unchanged.len()
        );

        let files_total = changes.pending_len();
        self.progress(tenant, sync_id, |op| {
            op.files_total = files_total;
            op.update_percentage();
            op.progress_stage = SyncStage::RemovingDeleted;
        })
        .await?;

        let namespace = tenant.namespace();
        let keywords = self.inner.backends.keywords.clone();
        let owner = tenant.clone();
        let keyword = tokio::task::spawn_blocking(move || keywords.for_tenant(&owner))
            .await
            .map_err(|e| RagError::other(format!("keyword index task failed: {}", e)))??;
        let mut index = 0;

        for record in &changes.deleted {
            if cancel.is_cancelled() {
                return Ok(SyncEnd::Cancelled);
            }
            index += 1;
            let outcome = match self.remove_file(tenant, &namespace, &keyword, record).await {
                Ok(chunks) => FileOutcome::Deleted { chunks },
                Err(e) if e.is_systemic() => return Err(e),
                Err(e) => {
                    self.mark_failed(tenant, &record.relative_path, &e).await;
                    FileOutcome::Failed
                }
            };
            self.record_outcome(tenant, sync_id, index, outcome).await?;
        }

        let mut work: Vec<(Option<FileRecord>, ListedFile)> = changes
            .created
            .into_iter()
            .map(|listed| (None, listed))
            .chain(
                changes
                    .updated
                    .into_iter()
                    .map(|(record, listed)| (Some(record), listed)),
            )
            .collect();
        work.sort_by(|a, b| a.1.relative_path.cmp(&b.1.relative_path));

        if !work.is_empty() {
            let dimension = self.inner.backends.embedder.dimension();
            let vectors = &self.inner.backends.vectors;
            let namespace = namespace.as_str();
            self.with_retry("prepare vector namespace", move || async move {
                Ok::<_, RagError>(vectors.ensure_namespace(namespace, dimension).await?)
            })
            .await?;
        }

        self.progress(tenant, sync_id, |op| {
            op.progress_stage = SyncStage::ProcessingFiles;
        })
        .await?;

        for (existing, listed) in work {
            if cancel.is_cancelled() {
                return Ok(SyncEnd::Cancelled);
            }
            index += 1;
            let is_update = existing.is_some();
            let outcome = match self
                .sync_file(tenant, &namespace, &keyword, existing, &listed)
                .await
            {
                Ok(write) if is_update => FileOutcome::Updated {
                    chunks: write.chunks,
                    replaced: write.replaced,
                },
                Ok(write) => FileOutcome::Added {
                    chunks: write.chunks,
                },
                Err(e) if e.is_systemic() => return Err(e),
                Err(e) => {
                    self.mark_failed(tenant, &listed.relative_path, &e).await;
                    FileOutcome::Failed
                }
            };
            self.record_outcome(tenant, sync_id, index, outcome).await?;
        }

        self.progress(tenant, sync_id, |op| {
            op.progress_stage = SyncStage::Finalizing;
        })
        .await?;
        Ok(SyncEnd::Completed)
    }

    async fn mark_failed(&self, tenant: &TenantId, relative_path: &str, error: &RagError) {
        tracing::warn!(
            "Failed to sync '{}' for tenant '{}': {}",
            relative_path,
            tenant,
            error
        );
        let message = error.to_string();
        let marked = self
            .store()
            .update_record(tenant, relative_path, |r| {
                r.sync_state = FileSyncState::Failed;
                r.error_message = Some(message);
            })
            .await;
        if let Err(e) = marked {
            tracing::warn!("Could not mark '{}' as failed: {}", relative_path, e);
        }
    }

    /// Remove a vanished file's vectors, keyword documents and chunks
    async fn remove_file(
        &self,
        tenant: &TenantId,
        namespace: &str,
        keyword: &Arc<BM25Search>,
        record: &FileRecord,
    ) -> RagResult<usize> {
        let chunks = self.store().chunks_for_file(tenant, &record.id).await?;
        let refs: Vec<String> = chunks.iter().map(|c| c.vector_ref.clone()).collect();
        self.delete_vectors(namespace, &refs).await?;
        let file_id = record.id.clone();
        keyword_write(keyword, move |k| k.delete_file(&file_id)).await?;

        let (_, removed) = self
            .store()
            .tombstone(tenant, &record.relative_path, Utc::now())
            .await?;
        tracing::debug!(
            "Removed '{}' ({} chunks) for tenant '{}'",
            record.relative_path,
            removed.len(),
            tenant
        );
        Ok(removed.len())
    }

    /// Read, chunk, embed and index one created or updated file
    async fn sync_file(
        &self,
        tenant: &TenantId,
        namespace: &str,
        keyword: &Arc<BM25Search>,
        existing: Option<FileRecord>,
        listed: &ListedFile,
    ) -> RagResult<FileWrite> {
        let mut record = existing.unwrap_or_else(|| FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant.clone(),
            relative_path: listed.relative_path.clone(),
            content_hash: listed.content_hash.clone(),
            size: listed.size,
            last_modified: listed.last_modified,
            sync_state: FileSyncState::Pending,
            error_message: None,
            chunk_count: 0,
            synced_at: None,
            deleted_at: None,
        });
        record.sync_state = FileSyncState::Processing;
        let file_id = record.id.clone();
        self.store().put_record(tenant, record).await?;

        let bytes = tokio::fs::read(&listed.path)
            .await
            .map_err(|e| IndexingError::FileReadFailed {
                file: listed.relative_path.clone(),
                reason: e.to_string(),
            })?;
        let relative_path = listed.relative_path.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(&relative_path, &bytes))
            .await
            .map_err(|e| RagError::other(format!("extraction task failed: {}", e)))??;

        let pieces = self.inner.chunker.chunk(&text);
        let embeddings = self.embed_pieces(&pieces).await?;
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .map(|piece| {
                let id = uuid::Uuid::new_v4().to_string();
                Chunk {
                    vector_ref: id.clone(),
                    id,
                    file_id: file_id.clone(),
                    chunk_index: piece.index,
                    token_count: piece.token_count(),
                    overlap_len: piece.overlap_len,
                    text: piece.text,
                }
            })
            .collect();

        let previous = self.store().chunks_for_file(tenant, &file_id).await?;
        if let Err(e) = self
            .write_index(namespace, keyword, &file_id, &previous, &chunks, embeddings)
            .await
        {
            self.discard_partial(tenant, namespace, keyword, &file_id, &chunks)
                .await;
            return Err(e);
        }

        let chunk_count = chunks.len();
        let replaced = self.store().replace_chunks(tenant, &file_id, chunks).await?;
        self.store()
            .update_record(tenant, &listed.relative_path, |r| {
                r.content_hash = listed.content_hash.clone();
                r.size = listed.size;
                r.last_modified = listed.last_modified;
                r.sync_state = FileSyncState::Synced;
                r.error_message = None;
                r.chunk_count = chunk_count;
                r.synced_at = Some(Utc::now());
            })
            .await?;

        tracing::debug!(
            "Synced '{}' for tenant '{}': {} chunks ({} replaced)",
            listed.relative_path,
            tenant,
            chunk_count,
            replaced.len()
        );
        Ok(FileWrite {
            chunks: chunk_count,
            replaced: replaced.len(),
        })
    }

    /// Delete the previous version's entries, then write the new ones
    async fn write_index(
        &self,
        namespace: &str,
        keyword: &Arc<BM25Search>,
        file_id: &str,
        previous: &[Chunk],
        chunks: &[Chunk],
        embeddings: Vec<Vec<f32>>,
    ) -> RagResult<()> {
        let old_refs: Vec<String> = previous.iter().map(|c| c.vector_ref.clone()).collect();
        self.delete_vectors(namespace, &old_refs).await?;
        let owner = file_id.to_string();
        keyword_write(keyword, move |k| k.delete_file(&owner)).await?;

        if chunks.is_empty() {
            return Ok(());
        }

        let entries: Vec<VectorEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| VectorEntry {
                vector_ref: chunk.vector_ref.clone(),
                vector,
                file_id: file_id.to_string(),
                chunk_id: chunk.id.clone(),
            })
            .collect();
        let vectors = &self.inner.backends.vectors;
        let entries = &entries;
        self.with_retry("upsert vectors", move || async move {
            Ok::<_, RagError>(vectors.upsert(namespace, entries.clone()).await?)
        })
        .await?;

        let documents: Vec<(String, String, String)> = chunks
            .iter()
            .map(|c| (c.id.clone(), file_id.to_string(), c.text.clone()))
            .collect();
        keyword_write(keyword, move |k| k.add_chunks(documents)).await
    }

    /// After a failed write the old entries may be gone already, so the
    /// catalog must stop pointing at them
    async fn discard_partial(
        &self,
        tenant: &TenantId,
        namespace: &str,
        keyword: &Arc<BM25Search>,
        file_id: &str,
        chunks: &[Chunk],
    ) {
        if let Err(e) = self.store().remove_chunks(tenant, file_id).await {
            tracing::warn!("Failed to drop chunks of file {}: {}", file_id, e);
        }
        let refs: Vec<String> = chunks.iter().map(|c| c.vector_ref.clone()).collect();
        if !refs.is_empty()
            && let Err(e) = self.inner.backends.vectors.delete(namespace, &refs).await
        {
            tracing::debug!("Could not clean up partial vectors of {}: {}", file_id, e);
        }
        let owner = file_id.to_string();
        if let Err(e) = keyword_write(keyword, move |k| k.delete_file(&owner)).await {
            tracing::debug!("Could not clean up keyword documents of {}: {}", file_id, e);
        }
    }

    async fn delete_vectors(&self, namespace: &str, refs: &[String]) -> RagResult<()> {
        if refs.is_empty() {
            return Ok(());
        }
        let vectors = &self.inner.backends.vectors;
        self.with_retry("delete vectors", move || async move {
            Ok::<_, RagError>(vectors.delete(namespace, refs).await?)
        })
        .await
    }

    async fn embed_pieces(&self, pieces: &[TextChunk]) -> RagResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.inner.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let texts = &texts;
            let embedder = &self.inner.backends.embedder;
            let timeout = self.inner.embed_timeout;
            let vectors = self
                .with_retry("embed batch", move || async move {
                    let vectors =
                        embedding::embed_with_timeout(embedder.clone(), texts.clone(), timeout)
                            .await?;
                    Ok::<_, RagError>(vectors)
                })
                .await?;
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    /// Retry retryable errors with exponential backoff
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> RagResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RagResult<T>>,
    {
        let max_retries = self.inner.sync.max_retries;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let delay = self.inner.sync.backoff_delay(attempt);
                    tracing::warn!(
                        "{} failed (attempt {} of {}): {}; retrying in {:?}",
                        what,
                        attempt,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Run a keyword index write on the blocking pool
///
/// Each write opens a Tantivy writer and commits, which blocks.
async fn keyword_write<F>(keyword: &Arc<BM25Search>, write: F) -> RagResult<()>
where
    F: FnOnce(&BM25Search) -> anyhow::Result<()> + Send + 'static,
{
    let keyword = keyword.clone();
    tokio::task::spawn_blocking(move || write(&keyword))
        .await
        .map_err(|e| RagError::other(format!("keyword index task failed: {}", e)))??;
    Ok(())
}
