//! In-process registry of running syncs, one entry per tenant
//!
//! An entry carries the cancellation token of the running task and a
//! broadcast channel over which the terminal snapshot is delivered to
//! waiters. When a state directory is configured the entry also owns the
//! tenant's filesystem lock, so evicting an entry releases it.

use super::fs_lock::FsLockGuard;
use crate::types::{SyncOperation, TenantId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

struct ActiveSync {
    sync_id: String,
    cancel: CancellationToken,
    done_tx: broadcast::Sender<SyncOperation>,
    /// Cleared once the terminal snapshot was broadcast
    active: Arc<AtomicBool>,
    _fs_lock: Option<FsLockGuard>,
}

/// Snapshot of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningSync {
    pub sync_id: String,
    /// False once the task broadcast its result but has not released yet
    pub active: bool,
}

type Entries = Arc<RwLock<HashMap<TenantId, ActiveSync>>>;

#[derive(Default)]
pub struct SyncRegistry {
    entries: Entries,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sync for `tenant`, replacing any previous entry
    ///
    /// Callers check [`SyncRegistry::current`] first; replacing is only valid
    /// for entries that finished or were evicted as stale.
    pub async fn register(
        &self,
        tenant: &TenantId,
        sync_id: &str,
        fs_lock: Option<FsLockGuard>,
    ) -> SyncGuard {
        let (done_tx, _) = broadcast::channel(4);
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicBool::new(true));

        let entry = ActiveSync {
            sync_id: sync_id.to_string(),
            cancel: cancel.clone(),
            done_tx: done_tx.clone(),
            active: active.clone(),
            _fs_lock: fs_lock,
        };
        if let Some(previous) = self.entries.write().await.insert(tenant.clone(), entry) {
            tracing::debug!(
                "Replaced registry entry {} for tenant '{}'",
                previous.sync_id,
                tenant
            );
        }

        SyncGuard {
            tenant: tenant.clone(),
            sync_id: sync_id.to_string(),
            entries: self.entries.clone(),
            done_tx,
            active,
            cancel,
            released: false,
        }
    }

    pub async fn current(&self, tenant: &TenantId) -> Option<RunningSync> {
        self.entries.read().await.get(tenant).map(|e| RunningSync {
            sync_id: e.sync_id.clone(),
            active: e.active.load(Ordering::Acquire),
        })
    }

    /// Whether a sync task is registered and still working for `tenant`
    pub async fn is_running(&self, tenant: &TenantId) -> bool {
        self.current(tenant).await.is_some_and(|r| r.active)
    }

    /// Subscribe to the terminal snapshot of `sync_id`
    ///
    /// Returns `None` when that sync is not registered (anymore).
    pub async fn subscribe(
        &self,
        tenant: &TenantId,
        sync_id: &str,
    ) -> Option<broadcast::Receiver<SyncOperation>> {
        self.entries
            .read()
            .await
            .get(tenant)
            .filter(|e| e.sync_id == sync_id)
            .map(|e| e.done_tx.subscribe())
    }

    /// Request cancellation of the tenant's running sync, returning its id
    pub async fn cancel(&self, tenant: &TenantId) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(tenant)?;
        entry.cancel.cancel();
        Some(entry.sync_id.clone())
    }

    /// Cancel and remove the entry of `sync_id`, dropping its filesystem lock
    pub async fn evict(&self, tenant: &TenantId, sync_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(tenant) {
            Some(entry) if entry.sync_id == sync_id => {
                entry.cancel.cancel();
                entries.remove(tenant);
                true
            }
            _ => false,
        }
    }
}

/// Held by the task running a sync
///
/// End with [`SyncGuard::complete`] when a terminal snapshot exists, or
/// [`SyncGuard::release`] otherwise. Dropping the guard without either removes
/// the entry in a spawned task.
pub struct SyncGuard {
    tenant: TenantId,
    sync_id: String,
    entries: Entries,
    done_tx: broadcast::Sender<SyncOperation>,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    released: bool,
}

impl SyncGuard {
    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Remove the entry, then deliver the terminal snapshot to waiters
    ///
    /// Waiters only wake once the filesystem lock is gone, so a follow-up
    /// trigger or purge from them cannot trip over it.
    pub async fn complete(mut self, op: &SyncOperation) {
        self.active.store(false, Ordering::Release);
        remove_if_owned(&self.entries, &self.tenant, &self.sync_id).await;
        self.released = true;
        // No receivers is fine
        let _ = self.done_tx.send(op.clone());
    }

    /// Remove the registry entry if it still belongs to this sync
    pub async fn release(mut self) {
        remove_if_owned(&self.entries, &self.tenant, &self.sync_id).await;
        self.released = true;
    }
}

async fn remove_if_owned(entries: &Entries, tenant: &TenantId, sync_id: &str) {
    let mut entries = entries.write().await;
    if entries.get(tenant).is_some_and(|e| e.sync_id == sync_id) {
        entries.remove(tenant);
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.active.store(false, Ordering::Release);
        tracing::warn!(
            "Sync {} for tenant '{}' dropped without release, cleaning up",
            self.sync_id,
            self.tenant
        );

        let entries = self.entries.clone();
        let tenant = self.tenant.clone();
        let sync_id = self.sync_id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                remove_if_owned(&entries, &tenant, &sync_id).await;
            });
        }
    }
}
