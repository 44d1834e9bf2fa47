//! Filesystem-based per-tenant locking for cross-process coordination
//!
//! Complements the in-process registry: two processes sharing a state
//! directory never sync the same tenant at once. The OS releases the lock if
//! the holder dies.

use crate::error::SyncError;
use crate::types::TenantId;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Lock file of a tenant: `<state_dir>/locks/<tenant>.lock`
pub fn lock_file_path(state_dir: &Path, tenant: &TenantId) -> PathBuf {
    state_dir
        .join("locks")
        .join(format!("{}.lock", tenant.as_str()))
}

/// Guard that holds an exclusive filesystem lock until dropped
#[derive(Debug)]
pub struct FsLockGuard {
    _file: File,
    path: PathBuf,
}

impl FsLockGuard {
    /// Try to take the tenant lock without blocking
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(state_dir: &Path, tenant: &TenantId) -> Result<Option<Self>, SyncError> {
        let lock_path = lock_file_path(state_dir, tenant);

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::LockFailed(format!("Failed to create lock directory: {}", e))
            })?;
        }

        let file = File::create(&lock_path)
            .map_err(|e| SyncError::LockFailed(format!("Failed to create lock file: {}", e)))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired filesystem lock {:?}", lock_path);
                Ok(Some(Self {
                    _file: file,
                    path: lock_path,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!("Filesystem lock {:?} is held elsewhere", lock_path);
                Ok(None)
            }
            Err(e) => Err(SyncError::LockFailed(e.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FsLockGuard {
    fn drop(&mut self) {
        // Closing the file releases the lock; the file itself is reused
        tracing::debug!("Releasing filesystem lock {:?}", self.path);
    }
}
