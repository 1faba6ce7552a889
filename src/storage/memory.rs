//! In-memory status store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{SagaInstance, SagaStatus};
use crate::storage::{Result, StatusStore, StoreError};

/// Status store backed by a map of immutable snapshots.
///
/// Writers replace the `Arc` for a saga under a short write lock; readers
/// clone the current `Arc` and release the lock before touching the data.
#[derive(Default)]
pub struct InMemoryStatusStore {
    sagas: RwLock<HashMap<Uuid, Arc<SagaInstance>>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sagas.
    pub async fn len(&self) -> usize {
        self.sagas.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sagas.read().await.is_empty()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn insert(&self, saga: &SagaInstance) -> Result<()> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&saga.id) {
            return Err(StoreError::AlreadyExists(saga.id));
        }
        sagas.insert(saga.id, Arc::new(saga.clone()));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SagaInstance>> {
        let snapshot = self.sagas.read().await.get(&id).cloned();
        Ok(snapshot.map(|s| (*s).clone()))
    }

    async fn update(&self, saga: &mut SagaInstance) -> Result<()> {
        let mut sagas = self.sagas.write().await;
        let stored = sagas.get(&saga.id).ok_or(StoreError::NotFound(saga.id))?;
        if stored.version != saga.version {
            return Err(StoreError::VersionConflict {
                id: saga.id,
                expected: saga.version,
                actual: stored.version,
            });
        }
        saga.version += 1;
        sagas.insert(saga.id, Arc::new(saga.clone()));
        Ok(())
    }

    async fn list(&self, status: Option<SagaStatus>) -> Result<Vec<SagaInstance>> {
        let snapshots: Vec<Arc<SagaInstance>> = self.sagas.read().await.values().cloned().collect();
        let mut sagas: Vec<SagaInstance> = snapshots
            .iter()
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .map(|s| (**s).clone())
            .collect();
        sagas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sagas)
    }
}
