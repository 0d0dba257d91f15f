use eva_store::{
    DatabaseConfig, EvaConfig, IndexProfile, InsertMode, PoolConfig, SchemaConfig,
    load_or_init_config,
};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn deserializes_pool_and_schema_settings() {
    let payload = json!({
        "database": { "backend": "sqlite", "path": "data.sqlite" },
        "schema": { "temporal": false, "index_profile": "minimal" },
        "pool": { "reader_connections": 8, "busy_timeout_ms": 250 },
        "write": { "insert_mode": "batched", "batch_rows": 64 }
    });
    let config: EvaConfig = serde_json::from_value(payload).expect("config");
    match config.database {
        DatabaseConfig::Sqlite { path } => {
            assert_eq!(path.as_deref(), Some("data.sqlite"));
        }
        _ => panic!("expected sqlite backend"),
    }
    assert!(!config.schema.temporal);
    assert_eq!(config.schema.index_profile, IndexProfile::Minimal);
    let pool = config.pool.expect("pool");
    assert_eq!(pool.reader_connections, Some(8));
    assert_eq!(pool.busy_timeout_ms, Some(250));
    let write = config.write.expect("write");
    assert_eq!(write.insert_mode, Some(InsertMode::Batched));
    assert_eq!(write.batch_rows, Some(64));
}

#[test]
fn missing_schema_defaults_to_temporal_full() {
    let payload = json!({ "database": { "backend": "memory" } });
    let config: EvaConfig = serde_json::from_value(payload).expect("config");
    assert_eq!(config.backend_name(), "memory");
    assert_eq!(config.schema, SchemaConfig::default());
    assert!(config.schema.temporal);
    assert_eq!(config.schema.index_profile, IndexProfile::Full);
    assert!(config.sqlite_path(std::path::Path::new(".")).is_err());
}

#[test]
fn default_sqlite_sets_no_pool() {
    let config = EvaConfig::default_sqlite("eva.sqlite");
    assert_eq!(config.backend_name(), "sqlite");
    assert!(config.pool.is_none());
    let tuning = config.tuning.expect("tuning");
    assert_eq!(tuning.journal_mode.as_deref(), Some("WAL"));
}

#[test]
fn pool_config_roundtrip() {
    let mut config = EvaConfig::in_memory().with_insert_mode(InsertMode::Batched);
    config.pool = Some(PoolConfig {
        reader_connections: Some(3),
        busy_timeout_ms: None,
    });
    let encoded = serde_json::to_string(&config).expect("encode");
    let decoded: EvaConfig = serde_json::from_str(&encoded).expect("decode");
    assert_eq!(decoded.pool.and_then(|pool| pool.reader_connections), Some(3));
    assert_eq!(
        decoded.write.and_then(|write| write.insert_mode),
        Some(InsertMode::Batched)
    );
}

#[test]
fn existing_config_file_wins() {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let created = load_or_init_config(base).expect("init");
    assert!(created.schema.temporal);

    let custom = EvaConfig::default_sqlite("custom.sqlite").with_schema(SchemaConfig {
        temporal: false,
        index_profile: IndexProfile::Full,
    });
    std::fs::write(
        base.join("eva.json"),
        serde_json::to_string_pretty(&custom).expect("encode"),
    )
    .expect("write config");
    let loaded = load_or_init_config(base).expect("load");
    assert!(!loaded.schema.temporal);
    assert_eq!(
        loaded.sqlite_path(base).expect("path"),
        base.join("custom.sqlite")
    );
}
