use super::*;
use std::collections::HashMap;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.embedding.model_name, "all-MiniLM-L6-v2");
    assert_eq!(config.embedding.batch_size, 32);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 150);
    assert_eq!(config.sync.max_retries, 3);
    assert_eq!(config.query.max_query_chars, 2000);
    assert_eq!(config.query.max_sources_limit, 20);
    assert_eq!(config.query.min_score, 0.2);
}

#[test]
fn test_validate_valid_config() {
    assert!(Config::default().validate().is_ok());
    assert!(Config::ephemeral("/tmp/tenants").validate().is_ok());
}

#[test]
fn test_validate_invalid_backend() {
    let mut config = Config::default();
    config.storage.vector_backend = "invalid".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.generation.backend = "magic".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_invalid_batch_size() {
    let mut config = Config::default();
    config.embedding.batch_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_overlap_must_be_smaller_than_chunk_size() {
    let mut config = Config::default();
    config.chunking.chunk_overlap = config.chunking.chunk_size;
    let err = config.validate().unwrap_err();
    assert!(err.is_user_error());
    assert!(err.to_string().contains("chunk_overlap"));
}

#[test]
fn test_validate_invalid_min_score() {
    let mut config = Config::default();
    config.query.min_score = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_default_sources_within_limit() {
    let mut config = Config::default();
    config.query.default_max_sources = 25;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_heartbeat_timeout_exceeds_interval() {
    let mut config = Config::default();
    config.sync.heartbeat_timeout_secs = config.sync.heartbeat_interval_secs;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_bad_tenant_root_key() {
    let mut config = Config::default();
    config
        .tenants
        .roots
        .insert("../escape".to_string(), PathBuf::from("/tmp"));
    assert!(config.validate().is_err());
}

#[test]
fn test_save_and_load() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path();

    let mut config = Config::default();
    config.embedding.batch_size = 64;
    config.query.min_score = 0.5;
    config
        .tenants
        .roots
        .insert("acme".to_string(), PathBuf::from("/srv/acme"));

    config.save(path).unwrap();
    let loaded = Config::from_file(path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_load_nonexistent_file() {
    let result = Config::from_file(Path::new("/nonexistent/config.toml"));
    assert!(matches!(
        result.unwrap_err(),
        RagError::Config(ConfigError::FileNotFound(_))
    ));
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config: Config = toml::from_str(
        r#"
        [chunking]
        chunk_size = 400
        chunk_overlap = 40
        "#,
    )
    .unwrap();

    assert_eq!(config.chunking.chunk_size, 400);
    assert_eq!(config.chunking.chunk_overlap, 40);
    assert_eq!(config.query.candidate_k, 20);
    assert!(config.validate().is_ok());
}

#[test]
fn test_toml_serialization() {
    let toml_str = toml::to_string(&Config::default()).unwrap();
    assert!(toml_str.contains("vector_backend"));
    assert!(toml_str.contains("model_name"));
    assert!(toml_str.contains("chunk_size"));
    assert!(toml_str.contains("heartbeat_timeout_secs"));
}

#[test]
fn test_apply_overrides() {
    let vars: HashMap<&str, &str> = [
        ("VECTOR_BACKEND", "memory"),
        ("MODEL", "BAAI/bge-base-en-v1.5"),
        ("BATCH_SIZE", "64"),
        ("MIN_SCORE", "0.4"),
        ("STATE_DIR", ""),
        ("TENANTS_ROOT", "/srv/tenants"),
    ]
    .into_iter()
    .collect();

    let mut config = Config::default();
    config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(config.storage.vector_backend, "memory");
    assert_eq!(config.embedding.model_name, "BAAI/bge-base-en-v1.5");
    assert_eq!(config.embedding.batch_size, 64);
    assert_eq!(config.query.min_score, 0.4);
    assert_eq!(config.storage.state_dir, None);
    assert_eq!(config.tenants.root_dir, PathBuf::from("/srv/tenants"));
}

#[test]
fn test_apply_overrides_ignores_unparsable_numbers() {
    let mut config = Config::default();
    config.apply_overrides(|key| (key == "BATCH_SIZE").then(|| "lots".to_string()));
    assert_eq!(config.embedding.batch_size, 32);
}

#[test]
fn test_root_for_tenant() {
    let mut tenants = TenantsConfig {
        root_dir: PathBuf::from("/srv/tenants"),
        roots: BTreeMap::new(),
    };
    let acme = TenantId::parse("acme").unwrap();
    assert_eq!(tenants.root_for(&acme), PathBuf::from("/srv/tenants/acme"));

    tenants
        .roots
        .insert("acme".to_string(), PathBuf::from("/data/acme-docs"));
    assert_eq!(tenants.root_for(&acme), PathBuf::from("/data/acme-docs"));
}

#[test]
fn test_backoff_delay_doubles() {
    let sync = SyncConfig {
        retry_base_delay_ms: 100,
        ..SyncConfig::default()
    };
    assert_eq!(sync.backoff_delay(1), Duration::from_millis(100));
    assert_eq!(sync.backoff_delay(2), Duration::from_millis(200));
    assert_eq!(sync.backoff_delay(3), Duration::from_millis(400));
}

#[test]
fn test_config_paths_use_platform_paths() {
    let config = Config::default();
    let lance = config.storage.lancedb_path.to_string_lossy();
    assert!(lance.contains("tenant-rag"));
    assert!(config.storage.state_dir.is_some());
}
