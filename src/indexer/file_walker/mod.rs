//! Read-only enumeration of a tenant's file root

use super::glob_filter::PathFilter;
use crate::error::IndexingError;
use crate::hasher;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A file found under a tenant root, with its content fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct ListedFile {
    /// Path relative to the root, `/`-separated
    pub relative_path: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_hash: String,
}

pub struct FileWalker {
    pub(crate) root: PathBuf,
    pub(crate) max_file_size: u64,
    pub(crate) filter: PathFilter,
}

impl FileWalker {
    pub fn new(root: impl AsRef<Path>, max_file_size: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size,
            filter: PathFilter::allow_all(),
        }
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    /// List every eligible file, sorted by relative path
    ///
    /// Hidden entries and anything matched by `.gitignore`/`.ignore` files are
    /// skipped, as are files over the size limit or rejected by the filter.
    /// Empty files are listed.
    pub fn list(&self) -> Result<Vec<ListedFile>, IndexingError> {
        if !self.root.exists() {
            return Err(IndexingError::DirectoryNotFound(
                self.root.display().to_string(),
            ));
        }
        if !self.root.is_dir() {
            return Err(IndexingError::NotADirectory(self.root.display().to_string()));
        }

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(true)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(false)
            .require_git(false)
            .follow_links(false)
            .build();

        let mut candidates = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| IndexingError::WalkFailed(e.to_string()))?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            let Some(relative_path) = self.relative_path(path) else {
                tracing::debug!("Skipping path outside root: {:?}", path);
                continue;
            };

            if !self.filter.is_allowed(&relative_path) {
                tracing::debug!("Filtered out: {}", relative_path);
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Cannot stat {:?}: {}", path, e);
                    continue;
                }
            };

            if metadata.len() > self.max_file_size {
                tracing::debug!("Skipping large file: {} ({} bytes)", relative_path, metadata.len());
                continue;
            }

            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH));

            candidates.push((relative_path, path.to_path_buf(), metadata.len(), last_modified));
        }

        let mut files: Vec<ListedFile> = candidates
            .into_par_iter()
            .map(|(relative_path, path, size, last_modified)| {
                let content_hash = match fs::read(&path) {
                    Ok(bytes) => hasher::hash_bytes(&bytes),
                    Err(e) => {
                        tracing::warn!("Cannot read {} for hashing: {}", relative_path, e);
                        hasher::fallback_hash(size, last_modified.timestamp())
                    }
                };
                ListedFile {
                    relative_path,
                    path,
                    size,
                    last_modified,
                    content_hash,
                }
            })
            .collect();

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        tracing::debug!("Listed {} files under {:?}", files.len(), self.root);
        Ok(files)
    }

    /// `/`-separated path relative to the root
    pub(crate) fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}
