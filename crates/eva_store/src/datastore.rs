//! Opening a store rooted at a directory that holds `eva.json`.

use std::path::{Path, PathBuf};

use log::info;

use crate::config::DEFAULT_DB_NAME;
use crate::{EvaConfig, EvaResult, EvaStore};

pub fn load_or_init_config(base: &Path) -> EvaResult<EvaConfig> {
    EvaConfig::load_or_init(base)
}

/// Opens the store described by `base/eva.json`, creating both on first use.
pub fn open_store(base: &Path) -> EvaResult<EvaStore> {
    let config = load_or_init_config(base)?;
    let store = EvaStore::connect(&config, base)?;
    let schema = store.schema_config();
    info!(
        "opened {} store under {} (temporal={}, indexes={:?})",
        config.backend_name(),
        base.display(),
        schema.temporal,
        schema.index_profile
    );
    Ok(store)
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use eva_core::{BlockClockApi, EvaError};
    use tempfile::tempdir;

    use super::{default_sqlite_path, load_or_init_config, open_store};
    use crate::config::CONFIG_FILE_NAME;

    #[test]
    fn first_open_writes_config_and_database() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let store = open_store(base).expect("open store");
        assert_eq!(store.last_block().expect("clock"), None);
        assert!(default_sqlite_path(base).exists());

        let written = fs::read_to_string(base.join(CONFIG_FILE_NAME)).expect("config file");
        assert!(written.contains("\"eva.sqlite\""));
        let reloaded = load_or_init_config(base).expect("reload");
        assert_eq!(reloaded.backend_name(), "sqlite");
        assert!(reloaded.schema.temporal);
    }

    #[test]
    fn invalid_config_file_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        fs::write(
            base.join(CONFIG_FILE_NAME),
            r#"{ "database": { "backend": "memory" }, "limits": { "sweep_batch_size": 0 } }"#,
        )
        .expect("write config");
        let err = open_store(base).err().expect("rejected");
        assert!(matches!(err, EvaError::Validation { .. }));

        fs::write(base.join(CONFIG_FILE_NAME), "{ not json").expect("write config");
        assert!(matches!(
            load_or_init_config(base),
            Err(EvaError::Validation { .. })
        ));
    }
}
