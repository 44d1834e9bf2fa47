//! Include/exclude glob filtering of tenant-relative paths

use crate::error::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled include/exclude patterns
///
/// A path is allowed when it matches at least one include pattern (or no
/// include patterns are configured) and matches no exclude pattern. Patterns
/// are tried against the whole relative path and against every suffix of it,
/// so `docs/**` also matches `archive/docs/old.txt`.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

fn build_set(patterns: &[String], key: &str) -> Result<Option<GlobSet>, ConfigError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("invalid glob '{}': {}", pattern, e),
        })?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn matches_path_or_suffix(set: &GlobSet, path: &str) -> bool {
    let path = path.trim_start_matches('/');
    if set.is_match(path) {
        return true;
    }

    path.match_indices('/')
        .any(|(idx, _)| set.is_match(&path[idx + 1..]))
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            include: build_set(include, "chunking.include_patterns")?,
            exclude: build_set(exclude, "chunking.exclude_patterns")?,
        })
    }

    /// Filter that lets every path through
    pub fn allow_all() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }

    /// Check a `/`-separated path relative to the tenant root
    pub fn is_allowed(&self, relative_path: &str) -> bool {
        if let Some(include) = &self.include
            && !matches_path_or_suffix(include, relative_path)
        {
            return false;
        }

        match &self.exclude {
            Some(exclude) => !matches_path_or_suffix(exclude, relative_path),
            None => true,
        }
    }
}
