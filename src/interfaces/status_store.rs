//! Status store interface.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{SagaInstance, SagaStatus};

/// Result type for status store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during status store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Saga not found: {0}")]
    NotFound(Uuid),

    #[error("Saga already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Version conflict for saga {id}: expected {expected}, got {actual}")]
    VersionConflict { id: Uuid, expected: u64, actual: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Durable mapping from saga id to saga state.
///
/// Writes use optimistic concurrency: `update` succeeds only if the stored
/// version equals `saga.version`, and bumps the version on success.
/// Reads return snapshots and never wait on a saga's execution.
///
/// Implementations:
/// - `InMemoryStatusStore`: process-local, for tests and local runs
/// - `SqliteStatusStore`: SQLite via sqlx
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Persist a new saga. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, saga: &SagaInstance) -> Result<()>;

    /// Load a snapshot. `None` for unknown ids.
    async fn get(&self, id: Uuid) -> Result<Option<SagaInstance>>;

    /// Compare-and-swap on `saga.version`; increments it on success.
    async fn update(&self, saga: &mut SagaInstance) -> Result<()>;

    /// List snapshots, optionally filtered by status, newest first.
    async fn list(&self, status: Option<SagaStatus>) -> Result<Vec<SagaInstance>>;

    /// Sagas that have not reached a terminal status, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<SagaInstance>> {
        let mut sagas: Vec<SagaInstance> = self
            .list(None)
            .await?
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect();
        sagas.sort_by_key(|s| s.created_at);
        Ok(sagas)
    }
}
