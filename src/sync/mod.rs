//! Delta synchronization of tenant file roots into the indexes

pub mod detector;
pub mod fs_lock;
pub mod orchestrator;
pub mod registry;

pub use detector::{ChangeDetector, ChangeSet};
pub use fs_lock::FsLockGuard;
pub use orchestrator::{SyncBackends, SyncOrchestrator};
pub use registry::{RunningSync, SyncGuard, SyncRegistry};

#[cfg(test)]
mod tests;
