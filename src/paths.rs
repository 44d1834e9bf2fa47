//! Platform-specific default locations for state, indexes and configuration
//!
//! Resolution goes through `dirs`, so Linux follows the XDG base directory
//! variables, macOS uses `~/Library/...` and Windows uses `%LOCALAPPDATA%`.

use std::path::PathBuf;

const APP_DIR: &str = "tenant-rag";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Base data directory for the current platform, `.` when unknown
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Base config directory for the current platform, `.` when unknown
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Returns: {data_dir}/tenant-rag
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(APP_DIR)
    }

    /// Returns: {config_dir}/tenant-rag
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(APP_DIR)
    }

    /// Per-tenant catalogs, operation history, BM25 indexes and lock files
    ///
    /// Returns: {data_dir}/tenant-rag/state
    pub fn default_state_dir() -> PathBuf {
        Self::project_data_dir().join("state")
    }

    /// Returns: {data_dir}/tenant-rag/lancedb
    pub fn default_lancedb_path() -> PathBuf {
        Self::project_data_dir().join("lancedb")
    }

    /// Parent of all tenant file roots
    ///
    /// Returns: {data_dir}/tenant-rag/tenants
    pub fn default_tenants_root() -> PathBuf {
        Self::project_data_dir().join("tenants")
    }

    /// Returns: {config_dir}/tenant-rag/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }
}
