use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::{DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Storage settings, read from a JSON file. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the catalog, heap files and log
    pub data_dir: PathBuf,
    pub page_size: usize,
    /// Buffer pool capacity in pages
    pub pool_pages: usize,
    /// Log file name, relative to `data_dir`
    pub log_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            page_size: DEFAULT_PAGE_SIZE,
            pool_pages: DEFAULT_POOL_PAGES,
            log_file: PathBuf::from("wal.log"),
        }
    }
}

impl StorageConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("heapdb.json");
        fs::write(&path, r#"{ "pool_pages": 8, "data_dir": "/tmp/heapdb" }"#).unwrap();

        let config = StorageConfig::load(&path).unwrap();
        assert_eq!(config.pool_pages, 8);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.log_path(), PathBuf::from("/tmp/heapdb/wal.log"));
    }

    #[test]
    fn test_invalid_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("heapdb.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(StorageConfig::load(&path), Err(ConfigError::Json(_))));
        assert!(matches!(
            StorageConfig::load(&temp_dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
