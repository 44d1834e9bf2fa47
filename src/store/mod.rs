//! Per-tenant catalog of file records, chunks and sync operations
//!
//! Each tenant's state sits behind its own lock so tenants never contend.
//! With a state directory configured, state is persisted as JSON under
//! `<state_dir>/<tenant>/`:
//!
//! - `operations.json` holds the operation history and is written through on
//!   every operation change.
//! - `catalog.json` holds file records and tombstones.
//! - `chunks/<file_id>.json` holds the chunks of one file.
//!
//! Catalog and chunk changes only mark the tenant dirty; [`StateStore::flush`]
//! writes what changed since the last flush. All disk access runs on the
//! blocking pool and outside the tenant lock.

use crate::error::StoreError;
use crate::types::{
    Chunk, FileRecord, FileSyncState, SyncOperation, SyncStatus, TenantId, TenantStats,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const CATALOG_FILE: &str = "catalog.json";
const OPERATIONS_FILE: &str = "operations.json";
const CHUNKS_DIR: &str = "chunks";

/// Terminal operations kept per tenant; older ones are dropped
pub const MAX_OPERATION_HISTORY: usize = 100;

/// Soft-deleted records kept per tenant; older ones are dropped
pub const MAX_TOMBSTONES: usize = 1000;

/// Persisted file and chunk state of a tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantCatalog {
    /// Active records keyed by relative path
    pub files: BTreeMap<String, FileRecord>,
    /// Soft-deleted records, oldest first
    #[serde(default)]
    pub tombstones: Vec<FileRecord>,
    /// Current chunks keyed by file id, stored one file per document
    #[serde(skip)]
    pub chunks: HashMap<String, Vec<Chunk>>,
    /// chunk id -> file id, rebuilt on load
    #[serde(skip)]
    chunk_owner: HashMap<String, String>,
}

impl TenantCatalog {
    fn rebuild_chunk_owner(&mut self) {
        self.chunk_owner = self
            .chunks
            .iter()
            .flat_map(|(file_id, chunks)| {
                chunks
                    .iter()
                    .map(move |c| (c.id.clone(), file_id.clone()))
            })
            .collect();
    }

    fn take_chunks(&mut self, file_id: &str) -> Vec<Chunk> {
        let removed = self.chunks.remove(file_id).unwrap_or_default();
        for chunk in &removed {
            self.chunk_owner.remove(&chunk.id);
        }
        removed
    }

    fn record_by_id(&self, file_id: &str) -> Option<&FileRecord> {
        self.files.values().find(|r| r.id == file_id)
    }

    fn prune_tombstones(&mut self) {
        if self.tombstones.len() > MAX_TOMBSTONES {
            let excess = self.tombstones.len() - MAX_TOMBSTONES;
            self.tombstones.drain(..excess);
        }
    }
}

/// A chunk together with the file it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkView {
    pub chunk: Chunk,
    pub file: FileRecord,
}

/// Result of a conditional operation insert
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// The new operation was recorded
    Started(SyncOperation),
    /// A live non-terminal operation already exists
    Active(SyncOperation),
}

/// Parts of a tenant's state changed since they were last written
#[derive(Debug, Default)]
struct Dirty {
    catalog: bool,
    operations: bool,
    /// Ids of files whose chunk file must be rewritten or removed
    chunk_files: HashSet<String>,
}

impl Dirty {
    fn merge(&mut self, other: Dirty) {
        self.catalog |= other.catalog;
        self.operations |= other.operations;
        self.chunk_files.extend(other.chunk_files);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Operations,
    All,
}

#[derive(Debug, Default)]
struct TenantState {
    catalog: TenantCatalog,
    operations: Vec<SyncOperation>,
    /// Whether changes are tracked for writing to disk
    persistent: bool,
    dirty: Dirty,
}

impl TenantState {
    fn mark_catalog(&mut self) {
        if self.persistent {
            self.dirty.catalog = true;
        }
    }

    fn mark_chunks(&mut self, file_id: &str) {
        if self.persistent {
            self.dirty.chunk_files.insert(file_id.to_string());
        }
    }

    fn mark_operations(&mut self) {
        if self.persistent {
            self.dirty.operations = true;
        }
    }

    /// Serialize the dirty parts within `scope` and clear their flags
    fn take_snapshot(&mut self, scope: Scope) -> Result<Snapshot, serde_json::Error> {
        let mut snapshot = Snapshot::default();

        if self.dirty.operations {
            snapshot.operations = Some(serde_json::to_string_pretty(&self.operations)?);
        }
        if scope == Scope::All {
            if self.dirty.catalog {
                snapshot.catalog = Some(serde_json::to_string_pretty(&self.catalog)?);
            }
            for file_id in &self.dirty.chunk_files {
                let content = match self.catalog.chunks.get(file_id) {
                    Some(chunks) => Some(serde_json::to_string(chunks)?),
                    None => None,
                };
                snapshot.chunk_files.push((file_id.clone(), content));
            }
        }

        self.dirty.operations = false;
        if scope == Scope::All {
            self.dirty.catalog = false;
            self.dirty.chunk_files.clear();
        }
        Ok(snapshot)
    }
}

/// Serialized state waiting to be written
#[derive(Debug, Default)]
struct Snapshot {
    catalog: Option<String>,
    operations: Option<String>,
    /// File id and chunk file contents; `None` removes the file
    chunk_files: Vec<(String, Option<String>)>,
}

impl Snapshot {
    fn is_empty(&self) -> bool {
        self.catalog.is_none() && self.operations.is_none() && self.chunk_files.is_empty()
    }

    /// What to mark dirty again if writing fails
    fn as_dirty(&self) -> Dirty {
        Dirty {
            catalog: self.catalog.is_some(),
            operations: self.operations.is_some(),
            chunk_files: self.chunk_files.iter().map(|(id, _)| id.clone()).collect(),
        }
    }

    /// Chunk files first, so the catalog never names chunks that are not on disk
    fn write(&self, dir: &Path) -> Result<(), StoreError> {
        for (file_id, content) in &self.chunk_files {
            let path = chunk_path(dir, file_id);
            match content {
                Some(content) => save_text(&path, content)?,
                None => remove_if_exists(&path)?,
            }
        }
        if let Some(catalog) = &self.catalog {
            save_text(&dir.join(CATALOG_FILE), catalog)?;
        }
        if let Some(operations) = &self.operations {
            save_text(&dir.join(OPERATIONS_FILE), operations)?;
        }
        Ok(())
    }
}

/// A tenant's state and the lock that orders its writes
struct TenantHandle {
    state: RwLock<TenantState>,
    /// Held across snapshot and write so an older snapshot never lands last
    write_lock: Mutex<()>,
}

impl TenantHandle {
    fn new(state: TenantState) -> Self {
        Self {
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
        }
    }
}

/// Store of all tenant state
pub struct StateStore {
    base_dir: Option<PathBuf>,
    tenants: Mutex<HashMap<TenantId, Arc<TenantHandle>>>,
}

fn chunk_path(dir: &Path, file_id: &str) -> PathBuf {
    dir.join(CHUNKS_DIR).join(format!("{}.json", file_id))
}

fn load_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).map_err(|e| StoreError::LoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| StoreError::LoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Write through a temporary file so a crash never leaves half a document
fn save_text(path: &Path, content: &str) -> Result<(), StoreError> {
    let fail = |reason: String| StoreError::SaveFailed {
        path: path.display().to_string(),
        reason,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| fail(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| fail(e.to_string()))
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::SaveFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

fn load_tenant(dir: &Path) -> Result<TenantState, StoreError> {
    let mut catalog: TenantCatalog = load_json(&dir.join(CATALOG_FILE))?;
    let file_ids: Vec<String> = catalog.files.values().map(|r| r.id.clone()).collect();
    for file_id in file_ids {
        let chunks: Vec<Chunk> = load_json(&chunk_path(dir, &file_id))?;
        if !chunks.is_empty() {
            catalog.chunks.insert(file_id, chunks);
        }
    }
    catalog.rebuild_chunk_owner();
    let operations: Vec<SyncOperation> = load_json(&dir.join(OPERATIONS_FILE))?;

    Ok(TenantState {
        catalog,
        operations,
        persistent: true,
        dirty: Dirty::default(),
    })
}

fn prune_history(operations: &mut Vec<SyncOperation>) {
    let terminal = operations.iter().filter(|op| op.is_terminal()).count();
    if terminal <= MAX_OPERATION_HISTORY {
        return;
    }
    let mut excess = terminal - MAX_OPERATION_HISTORY;
    operations.retain(|op| {
        if excess > 0 && op.is_terminal() {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

impl StateStore {
    /// Create a store; `None` keeps everything in memory
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    fn tenant_dir(&self, tenant: &TenantId) -> Option<PathBuf> {
        self.base_dir.as_ref().map(|dir| dir.join(tenant.as_str()))
    }

    async fn tenant(&self, tenant: &TenantId) -> Result<Arc<TenantHandle>, StoreError> {
        if let Some(handle) = self.tenants.lock().await.get(tenant) {
            return Ok(handle.clone());
        }

        // Loaded without the map lock so other tenants are not held up
        let state = match self.tenant_dir(tenant) {
            Some(dir) => {
                let path = dir.display().to_string();
                let state = tokio::task::spawn_blocking(move || load_tenant(&dir))
                    .await
                    .map_err(|e| StoreError::LoadFailed {
                        path,
                        reason: format!("load task failed: {}", e),
                    })??;
                tracing::debug!(
                    "Loaded state for tenant '{}': {} files, {} operations",
                    tenant,
                    state.catalog.files.len(),
                    state.operations.len()
                );
                state
            }
            None => TenantState::default(),
        };

        // A concurrent caller may have loaded it first; its copy wins
        let mut tenants = self.tenants.lock().await;
        Ok(tenants
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(TenantHandle::new(state)))
            .clone())
    }

    /// Write the dirty parts of a tenant's state within `scope`
    async fn write_dirty(
        &self,
        tenant: &TenantId,
        handle: &TenantHandle,
        scope: Scope,
    ) -> Result<(), StoreError> {
        let Some(dir) = self.tenant_dir(tenant) else {
            return Ok(());
        };
        let path = dir.display().to_string();

        let _ordered = handle.write_lock.lock().await;
        let snapshot = handle
            .state
            .write()
            .await
            .take_snapshot(scope)
            .map_err(|e| StoreError::SaveFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if snapshot.is_empty() {
            return Ok(());
        }

        let retry = snapshot.as_dirty();
        let written = tokio::task::spawn_blocking(move || snapshot.write(&dir))
            .await
            .map_err(|e| StoreError::SaveFailed {
                path,
                reason: format!("write task failed: {}", e),
            })
            .and_then(|result| result);
        if written.is_err() {
            handle.state.write().await.dirty.merge(retry);
        }
        written
    }

    /// Write catalog and chunk changes made since the last flush
    ///
    /// No-op for in-memory stores.
    pub async fn flush(&self, tenant: &TenantId) -> Result<(), StoreError> {
        let handle = self.tenant(tenant).await?;
        self.write_dirty(tenant, &handle, Scope::All).await
    }

    /// Drop the cached state of a tenant so the next access reads it from disk
    ///
    /// Used after taking the cross-process lock, since another process may
    /// have synced the tenant in the meantime. Unflushed catalog changes are
    /// discarded. No-op for in-memory stores.
    pub async fn reload(&self, tenant: &TenantId) {
        if self.base_dir.is_some() {
            self.tenants.lock().await.remove(tenant);
        }
    }

    /// Tenants with state in memory or on disk
    pub async fn known_tenants(&self) -> Vec<TenantId> {
        let mut known: Vec<TenantId> = self.tenants.lock().await.keys().cloned().collect();
        if let Some(dir) = &self.base_dir
            && let Ok(entries) = fs::read_dir(dir)
        {
            for entry in entries.flatten() {
                if entry.path().join(OPERATIONS_FILE).exists()
                    && let Some(name) = entry.file_name().to_str()
                    && let Ok(tenant) = TenantId::parse(name)
                    && !known.contains(&tenant)
                {
                    known.push(tenant);
                }
            }
        }
        known.sort();
        known
    }

    // ---- file records ----

    /// Active (not soft-deleted) records sorted by path
    pub async fn active_records(&self, tenant: &TenantId) -> Result<Vec<FileRecord>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        Ok(state.catalog.files.values().cloned().collect())
    }

    pub async fn record(
        &self,
        tenant: &TenantId,
        relative_path: &str,
    ) -> Result<Option<FileRecord>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        Ok(state.catalog.files.get(relative_path).cloned())
    }

    /// Soft-deleted records, oldest first
    pub async fn tombstones(&self, tenant: &TenantId) -> Result<Vec<FileRecord>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        Ok(state.catalog.tombstones.clone())
    }

    /// Insert or replace a record by relative path
    pub async fn put_record(&self, tenant: &TenantId, record: FileRecord) -> Result<(), StoreError> {
        let handle = self.tenant(tenant).await?;
        let mut state = handle.state.write().await;
        state
            .catalog
            .files
            .insert(record.relative_path.clone(), record);
        state.mark_catalog();
        Ok(())
    }

    /// Apply `f` to the record at `relative_path`
    pub async fn update_record<F>(
        &self,
        tenant: &TenantId,
        relative_path: &str,
        f: F,
    ) -> Result<FileRecord, StoreError>
    where
        F: FnOnce(&mut FileRecord),
    {
        let handle = self.tenant(tenant).await?;
        let mut state = handle.state.write().await;
        let record = state
            .catalog
            .files
            .get_mut(relative_path)
            .ok_or_else(|| StoreError::FileNotFound(relative_path.to_string()))?;
        f(record);
        let updated = record.clone();
        state.mark_catalog();
        Ok(updated)
    }

    /// Move a record to the tombstones, dropping its chunks
    ///
    /// Returns the tombstoned record and the chunks that were removed. Only
    /// the newest [`MAX_TOMBSTONES`] tombstones are kept.
    pub async fn tombstone(
        &self,
        tenant: &TenantId,
        relative_path: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<(FileRecord, Vec<Chunk>), StoreError> {
        let handle = self.tenant(tenant).await?;
        let mut state = handle.state.write().await;
        let mut record = state
            .catalog
            .files
            .remove(relative_path)
            .ok_or_else(|| StoreError::FileNotFound(relative_path.to_string()))?;
        let removed = state.catalog.take_chunks(&record.id);

        record.deleted_at = Some(deleted_at);
        record.chunk_count = 0;
        state.catalog.tombstones.push(record.clone());
        state.catalog.prune_tombstones();
        state.mark_catalog();
        state.mark_chunks(&record.id);
        Ok((record, removed))
    }

    // ---- chunks ----

    pub async fn chunks_for_file(
        &self,
        tenant: &TenantId,
        file_id: &str,
    ) -> Result<Vec<Chunk>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        Ok(state.catalog.chunks.get(file_id).cloned().unwrap_or_default())
    }

    /// Replace every chunk of a file in one step, returning the previous set
    pub async fn replace_chunks(
        &self,
        tenant: &TenantId,
        file_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<Chunk>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let mut state = handle.state.write().await;
        let previous = state.catalog.take_chunks(file_id);
        for chunk in &chunks {
            state
                .catalog
                .chunk_owner
                .insert(chunk.id.clone(), file_id.to_string());
        }
        if !chunks.is_empty() {
            state.catalog.chunks.insert(file_id.to_string(), chunks);
        }
        state.mark_chunks(file_id);
        Ok(previous)
    }

    /// Drop every chunk of a file, returning what was removed
    pub async fn remove_chunks(
        &self,
        tenant: &TenantId,
        file_id: &str,
    ) -> Result<Vec<Chunk>, StoreError> {
        self.replace_chunks(tenant, file_id, Vec::new()).await
    }

    /// Resolve chunk ids to chunks of this tenant's active files
    ///
    /// Ids that do not belong to the tenant are silently left out.
    pub async fn chunk_views(
        &self,
        tenant: &TenantId,
        chunk_ids: &[String],
    ) -> Result<HashMap<String, ChunkView>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        let catalog = &state.catalog;

        let mut views = HashMap::new();
        for chunk_id in chunk_ids {
            let Some(file_id) = catalog.chunk_owner.get(chunk_id) else {
                continue;
            };
            let Some(file) = catalog.record_by_id(file_id) else {
                continue;
            };
            if let Some(chunk) = catalog
                .chunks
                .get(file_id)
                .and_then(|chunks| chunks.iter().find(|c| &c.id == chunk_id))
            {
                views.insert(
                    chunk_id.clone(),
                    ChunkView {
                        chunk: chunk.clone(),
                        file: file.clone(),
                    },
                );
            }
        }
        Ok(views)
    }

    // ---- sync operations ----

    /// Record `op` unless a live non-terminal operation exists
    ///
    /// A non-terminal operation whose heartbeat is older than `stale_after` is
    /// marked failed and superseded. Check and insert happen under one lock.
    pub async fn begin_operation(
        &self,
        tenant: &TenantId,
        op: SyncOperation,
        stale_after: chrono::Duration,
    ) -> Result<BeginOutcome, StoreError> {
        let handle = self.tenant(tenant).await?;
        {
            let mut state = handle.state.write().await;
            let now = Utc::now();

            if let Some(existing) = state.operations.iter_mut().find(|o| !o.is_terminal()) {
                if !existing.is_stale(now, stale_after) {
                    return Ok(BeginOutcome::Active(existing.clone()));
                }
                tracing::warn!(
                    "Sync {} for tenant '{}' missed its heartbeat, marking failed",
                    existing.id,
                    tenant
                );
                existing.finish(SyncStatus::Failed, Some("heartbeat timeout".to_string()));
            }

            state.operations.push(op.clone());
            prune_history(&mut state.operations);
            state.mark_operations();
        }
        self.write_dirty(tenant, &handle, Scope::Operations).await?;
        Ok(BeginOutcome::Started(op))
    }

    /// Apply `f` to an operation and persist it
    pub async fn update_operation<F>(
        &self,
        tenant: &TenantId,
        op_id: &str,
        f: F,
    ) -> Result<SyncOperation, StoreError>
    where
        F: FnOnce(&mut SyncOperation),
    {
        let handle = self.tenant(tenant).await?;
        let updated = {
            let mut state = handle.state.write().await;
            let op = state
                .operations
                .iter_mut()
                .find(|o| o.id == op_id)
                .ok_or_else(|| StoreError::OperationNotFound(op_id.to_string()))?;
            f(op);
            let updated = op.clone();
            state.mark_operations();
            updated
        };
        self.write_dirty(tenant, &handle, Scope::Operations).await?;
        Ok(updated)
    }

    pub async fn get_operation(
        &self,
        tenant: &TenantId,
        op_id: &str,
    ) -> Result<Option<SyncOperation>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        Ok(state.operations.iter().find(|o| o.id == op_id).cloned())
    }

    /// Find an operation by id across all known tenants
    pub async fn find_operation(&self, op_id: &str) -> Result<Option<SyncOperation>, StoreError> {
        for tenant in self.known_tenants().await {
            if let Some(op) = self.get_operation(&tenant, op_id).await? {
                return Ok(Some(op));
            }
        }
        Ok(None)
    }

    /// Most recently created operation of a tenant
    pub async fn latest_operation(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<SyncOperation>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        Ok(state.operations.last().cloned())
    }

    /// The non-terminal operation of a tenant, if any
    pub async fn active_operation(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<SyncOperation>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        Ok(state.operations.iter().find(|o| !o.is_terminal()).cloned())
    }

    /// Mark the tenant's non-terminal operation failed if its heartbeat is stale
    pub async fn expire_stale(
        &self,
        tenant: &TenantId,
        timeout: chrono::Duration,
    ) -> Result<Option<SyncOperation>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let expired = {
            let mut state = handle.state.write().await;
            let now = Utc::now();
            let Some(op) = state
                .operations
                .iter_mut()
                .find(|o| o.is_stale(now, timeout))
            else {
                return Ok(None);
            };
            op.finish(SyncStatus::Failed, Some("heartbeat timeout".to_string()));
            let expired = op.clone();
            state.mark_operations();
            expired
        };
        self.write_dirty(tenant, &handle, Scope::Operations).await?;
        Ok(Some(expired))
    }

    /// Mark the tenant's non-terminal operation failed regardless of heartbeat
    pub async fn fail_active(
        &self,
        tenant: &TenantId,
        reason: &str,
    ) -> Result<Option<SyncOperation>, StoreError> {
        let handle = self.tenant(tenant).await?;
        let failed = {
            let mut state = handle.state.write().await;
            let Some(op) = state.operations.iter_mut().find(|o| !o.is_terminal()) else {
                return Ok(None);
            };
            op.finish(SyncStatus::Failed, Some(reason.to_string()));
            let failed = op.clone();
            state.mark_operations();
            failed
        };
        self.write_dirty(tenant, &handle, Scope::Operations).await?;
        Ok(Some(failed))
    }

    // ---- tenant level ----

    pub async fn stats(&self, tenant: &TenantId) -> Result<TenantStats, StoreError> {
        let handle = self.tenant(tenant).await?;
        let state = handle.state.read().await;
        let catalog = &state.catalog;

        let count = |wanted: FileSyncState| {
            catalog
                .files
                .values()
                .filter(|r| r.sync_state == wanted)
                .count()
        };

        Ok(TenantStats {
            files_total: catalog.files.len(),
            files_synced: count(FileSyncState::Synced),
            files_failed: count(FileSyncState::Failed),
            files_pending: count(FileSyncState::Pending) + count(FileSyncState::Processing),
            files_deleted: catalog.tombstones.len(),
            total_chunks: catalog.chunks.values().map(Vec::len).sum(),
            last_sync: state.operations.last().map(|op| op.status),
        })
    }

    /// Forget all state of a tenant, on disk as well
    pub async fn purge(&self, tenant: &TenantId) -> Result<(), StoreError> {
        let handle = self.tenant(tenant).await?;
        let _ordered = handle.write_lock.lock().await;
        {
            let mut state = handle.state.write().await;
            let persistent = state.persistent;
            *state = TenantState {
                persistent,
                ..TenantState::default()
            };
        }

        if let Some(dir) = self.tenant_dir(tenant) {
            let path = dir.display().to_string();
            tokio::task::spawn_blocking(move || {
                remove_if_exists(&dir.join(CATALOG_FILE))?;
                remove_if_exists(&dir.join(OPERATIONS_FILE))?;
                let chunks = dir.join(CHUNKS_DIR);
                if chunks.exists() {
                    fs::remove_dir_all(&chunks).map_err(|e| StoreError::SaveFailed {
                        path: chunks.display().to_string(),
                        reason: e.to_string(),
                    })?;
                }
                Ok::<_, StoreError>(())
            })
            .await
            .map_err(|e| StoreError::SaveFailed {
                path,
                reason: format!("purge task failed: {}", e),
            })??;
        }
        tracing::info!("Purged catalog of tenant '{}'", tenant);
        Ok(())
    }
}
