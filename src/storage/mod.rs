//! Status store implementations.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{StorageConfig, STORAGE_TYPE_MEMORY, STORAGE_TYPE_SQLITE};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use crate::interfaces::status_store::{Result, StatusStore, StoreError};
pub use memory::InMemoryStatusStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStatusStore;

/// Initialize the status store based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn StatusStore>, Box<dyn std::error::Error>> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        STORAGE_TYPE_MEMORY => Ok(Arc::new(InMemoryStatusStore::new())),
        #[cfg(feature = "sqlite")]
        STORAGE_TYPE_SQLITE => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;

            let store = SqliteStatusStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        STORAGE_TYPE_SQLITE => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
        other => {
            error!("Unknown storage type: {}", other);
            Err(format!("Unknown storage type: {}", other).into())
        }
    }
}
