//! Status store configuration.

use serde::Deserialize;

/// Storage type value for the in-memory status store.
pub const STORAGE_TYPE_MEMORY: &str = "memory";
/// Storage type value for the SQLite status store.
pub const STORAGE_TYPE_SQLITE: &str = "sqlite";

/// Status store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: `memory` or `sqlite`.
    pub storage_type: String,
    /// Database file path (sqlite only).
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: STORAGE_TYPE_SQLITE.to_string(),
            path: "./data/sagas.db".to_string(),
        }
    }
}

impl StorageConfig {
    /// In-memory store, state is lost on restart.
    pub fn memory() -> Self {
        Self {
            storage_type: STORAGE_TYPE_MEMORY.to_string(),
            path: String::new(),
        }
    }

    /// SQLite store at `path`.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            storage_type: STORAGE_TYPE_SQLITE.to_string(),
            path: path.into(),
        }
    }
}
