//! In-process status store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::StatusStore;
use crate::error::StoreError;
use crate::worker::state::TaskRecord;

/// Keeps snapshots and result payloads in memory. Useful for embedding
/// the processor without a results directory, and in tests.
#[derive(Default)]
pub struct MemoryStatusStore {
    snapshots: RwLock<HashMap<Uuid, TaskRecord>>,
    results: RwLock<HashMap<PathBuf, serde_json::Value>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result payload written at `path`, if any.
    pub async fn result(&self, path: &Path) -> Option<serde_json::Value> {
        self.results.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn persist(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(record.task_id, record.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        self.snapshots.write().await.remove(&id);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.snapshots.read().await.get(&id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.snapshots.read().await.values().cloned().collect())
    }

    async fn write_result(
        &self,
        record: &TaskRecord,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, StoreError> {
        let path = PathBuf::from(format!("memory://{}/{}", record.kind, record.task_id));
        self.results
            .write()
            .await
            .insert(path.clone(), payload.clone());
        Ok(path)
    }

    async fn remove_result(&self, path: &Path) -> Result<(), StoreError> {
        self.results.write().await.remove(path);
        Ok(())
    }
}
