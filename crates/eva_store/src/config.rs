use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::info;

use serde::{Deserialize, Serialize};

use eva_core::{EvaError, EvaResult};

pub const CONFIG_FILE_NAME: &str = "eva.json";
pub const DEFAULT_DB_NAME: &str = "eva.sqlite";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Memory,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexProfile {
    /// Every index the point, range and expiry paths use.
    #[default]
    Full,
    /// Only what expiry scans need; for bulk loads before a rebuild.
    Minimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// `false` selects the simple EAV layout: one `block` column, no history.
    pub temporal: bool,
    #[serde(default)]
    pub index_profile: IndexProfile,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            temporal: true,
            index_profile: IndexProfile::Full,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub reader_connections: Option<u32>,
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TuningConfig {
    pub journal_mode: Option<String>,
    pub synchronous: Option<String>,
    pub cache_size_kib: Option<i64>,
    pub mmap_size_bytes: Option<i64>,
}

impl TuningConfig {
    pub fn with_defaults() -> Self {
        Self {
            journal_mode: Some("WAL".to_string()),
            synchronous: Some("NORMAL".to_string()),
            cache_size_kib: Some(64_000),
            mmap_size_bytes: Some(268_435_456),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    /// One cached prepared statement executed per row.
    #[default]
    Individual,
    /// Multi-row `INSERT ... VALUES` chunks.
    Batched,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteConfig {
    pub insert_mode: Option<InsertMode>,
    pub batch_rows: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub default_query_limit: Option<u32>,
    pub max_query_limit: Option<u32>,
    pub sweep_batch_size: Option<u32>,
}

impl LimitsConfig {
    pub fn with_defaults() -> Self {
        Self {
            default_query_limit: Some(100),
            max_query_limit: Some(10_000),
            sweep_batch_size: Some(5_000),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntegrityConfig {
    pub warn_on_overlap: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    pub pool: Option<PoolConfig>,
    pub tuning: Option<TuningConfig>,
    pub write: Option<WriteConfig>,
    pub limits: Option<LimitsConfig>,
    pub integrity: Option<IntegrityConfig>,
}

impl EvaConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            schema: SchemaConfig::default(),
            pool: None,
            tuning: Some(TuningConfig::with_defaults()),
            write: None,
            limits: Some(LimitsConfig::with_defaults()),
            integrity: Some(IntegrityConfig {
                warn_on_overlap: Some(true),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig::Memory,
            schema: SchemaConfig::default(),
            pool: None,
            tuning: None,
            write: None,
            limits: Some(LimitsConfig::with_defaults()),
            integrity: Some(IntegrityConfig {
                warn_on_overlap: Some(true),
            }),
        }
    }

    pub fn with_schema(mut self, schema: SchemaConfig) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_insert_mode(mut self, insert_mode: InsertMode) -> Self {
        let mut write = self.write.take().unwrap_or(WriteConfig {
            insert_mode: None,
            batch_rows: None,
        });
        write.insert_mode = Some(insert_mode);
        self.write = Some(write);
        self
    }

    pub fn config_path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE_NAME)
    }

    /// Reads `eva.json` from `base_dir`, writing the default SQLite config
    /// first when none exists. The default database path stays relative so
    /// the directory can move.
    pub fn load_or_init(base_dir: &Path) -> EvaResult<Self> {
        let path = Self::config_path(base_dir);
        let config = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<Self>(&raw)
                .map_err(|err| EvaError::invalid(format!("{}: {err}", path.display())))?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let config = Self::default_sqlite(DEFAULT_DB_NAME);
                fs::create_dir_all(base_dir)
                    .map_err(|err| EvaError::storage(format!("create config dir: {err}")))?;
                fs::write(&path, serde_json::to_string_pretty(&config)?)
                    .map_err(|err| EvaError::storage(format!("write {}: {err}", path.display())))?;
                info!("wrote default config to {}", path.display());
                config
            }
            Err(err) => {
                return Err(EvaError::storage(format!("read {}: {err}", path.display())));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the store cannot honor.
    pub fn validate(&self) -> EvaResult<()> {
        if let DatabaseConfig::Sqlite { path: Some(path) } = &self.database {
            if path.trim().is_empty() {
                return Err(EvaError::invalid("database.path is empty"));
            }
        }
        if let Some(limits) = &self.limits {
            if limits.sweep_batch_size == Some(0) {
                return Err(EvaError::invalid("limits.sweep_batch_size must be positive"));
            }
            match (limits.default_query_limit, limits.max_query_limit) {
                (_, Some(0)) => {
                    return Err(EvaError::invalid("limits.max_query_limit must be positive"));
                }
                (Some(default), Some(max)) if default > max => {
                    return Err(EvaError::invalid(format!(
                        "limits.default_query_limit {default} exceeds max_query_limit {max}"
                    )));
                }
                _ => {}
            }
        }
        if self.write.as_ref().and_then(|write| write.batch_rows) == Some(0) {
            return Err(EvaError::invalid("write.batch_rows must be positive"));
        }
        Ok(())
    }

    /// Database file for the SQLite backend. Relative paths resolve
    /// against `base_dir`.
    pub fn sqlite_path(&self, base_dir: &Path) -> EvaResult<PathBuf> {
        let DatabaseConfig::Sqlite { path } = &self.database else {
            return Err(EvaError::invalid(format!(
                "{} backend has no database file",
                self.backend_name()
            )));
        };
        let file = Path::new(path.as_deref().unwrap_or(DEFAULT_DB_NAME));
        Ok(if file.is_absolute() {
            file.to_path_buf()
        } else {
            base_dir.join(file)
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Memory => "memory",
        }
    }
}
