//! Diffing a directory listing against the last known file records

use crate::indexer::ListedFile;
use crate::types::{FileRecord, FileSyncState};
use std::collections::{BTreeMap, HashMap};

/// Proposed changes for one sync, each list sorted by relative path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// On disk, no record
    pub created: Vec<ListedFile>,
    /// On disk with a record whose hash differs, or whose last sync did not succeed
    pub updated: Vec<(FileRecord, ListedFile)>,
    /// Record without a file on disk
    pub deleted: Vec<FileRecord>,
    /// Same path and hash, already synced
    pub unchanged: Vec<FileRecord>,
}

impl ChangeSet {
    /// Number of entries that require work
    pub fn pending_len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }
}

/// Compares listings with stored records by `(relative_path, content_hash)`
///
/// Purely functional: it never touches persisted state. A rename shows up as
/// one deletion plus one creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    force_full: bool,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propose every existing record as updated regardless of hash
    pub fn force_full(mut self, force_full: bool) -> Self {
        self.force_full = force_full;
        self
    }

    pub fn detect(&self, listing: &[ListedFile], records: &[FileRecord]) -> ChangeSet {
        let on_disk: BTreeMap<&str, &ListedFile> = listing
            .iter()
            .map(|f| (f.relative_path.as_str(), f))
            .collect();
        let known: HashMap<&str, &FileRecord> = records
            .iter()
            .map(|r| (r.relative_path.as_str(), r))
            .collect();

        let mut changes = ChangeSet::default();

        for (path, listed) in &on_disk {
            match known.get(path) {
                None => changes.created.push((*listed).clone()),
                Some(record) => {
                    let needs_work = self.force_full
                        || record.content_hash != listed.content_hash
                        || record.sync_state != FileSyncState::Synced;
                    if needs_work {
                        changes.updated.push(((*record).clone(), (*listed).clone()));
                    } else {
                        changes.unchanged.push((*record).clone());
                    }
                }
            }
        }

        let mut deleted: Vec<FileRecord> = records
            .iter()
            .filter(|r| !on_disk.contains_key(r.relative_path.as_str()))
            .cloned()
            .collect();
        deleted.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        changes.deleted = deleted;

        changes
    }
}
