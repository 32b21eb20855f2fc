//! `StatusStore` trait — durable projection of task records.
//!
//! The in-memory registry stays authoritative while the process is alive;
//! a store only holds the last snapshot written for each id so pollers and
//! a restarted process can see last-known state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::worker::state::TaskRecord;

/// Backend-agnostic snapshot store.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Overwrite the snapshot for `record.task_id`. Safe to retry.
    async fn persist(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Delete the snapshot for `id`. Missing snapshots are not an error.
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;

    /// Load the snapshot for `id`.
    async fn load(&self, id: Uuid) -> Result<Option<TaskRecord>, StoreError>;

    /// Load every snapshot in the store.
    async fn load_all(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Durably write a completed task's payload and return its location.
    async fn write_result(
        &self,
        record: &TaskRecord,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, StoreError>;

    /// Delete a result artifact previously returned by `write_result`.
    async fn remove_result(&self, path: &Path) -> Result<(), StoreError>;
}
