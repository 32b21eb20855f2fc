//! File-backed status store: one pretty-printed JSON snapshot per task.
//!
//! Layout under the results directory:
//! - `task_status_{id}.json` — latest snapshot of the task record
//! - `background_{kind}_{id}.json` — result payload of a completed task

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::traits::StatusStore;
use crate::error::StoreError;
use crate::worker::state::TaskRecord;

const STATUS_PREFIX: &str = "task_status_";

/// Status snapshots and result artifacts stored as files in one directory.
pub struct FileStatusStore {
    base_path: PathBuf,
}

impl FileStatusStore {
    /// Open a store rooted at `base_path`, creating the directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the status snapshot for `id`.
    pub fn status_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(format!("{STATUS_PREFIX}{id}.json"))
    }

    fn result_path(&self, record: &TaskRecord) -> PathBuf {
        self.base_path
            .join(format!("background_{}_{}.json", record.kind, record.task_id))
    }

    /// Write via a temp file + rename so readers never see a partial snapshot.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn persist(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&self.status_path(record.task_id), &json)
            .await?;
        debug!(task_id = %record.task_id, status = %record.status, "Persisted task status");
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        remove_if_exists(&self.status_path(id)).await
    }

    async fn load(&self, id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        match fs::read(self.status_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(STATUS_PREFIX) || !name.ends_with(".json") {
                continue;
            }

            let bytes = match fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping status snapshot that could not be read");
                    continue;
                }
            };
            match serde_json::from_slice::<TaskRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable status snapshot"),
            }
        }

        Ok(records)
    }

    async fn write_result(
        &self,
        record: &TaskRecord,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, StoreError> {
        let path = self.result_path(record);
        let json = serde_json::to_vec_pretty(payload)?;
        self.write_atomic(&path, &json).await?;
        Ok(path)
    }

    async fn remove_result(&self, path: &Path) -> Result<(), StoreError> {
        remove_if_exists(path).await
    }
}
