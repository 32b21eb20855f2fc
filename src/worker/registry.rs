//! In-memory index of every known task.
//!
//! This map is the only shared mutable structure in the processor. Every
//! transition runs under its write lock, which is what makes "exactly one
//! worker claims a job" and "cancel vs. completion leaves one terminal
//! state" hold.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::TaskError;
use crate::worker::state::{TaskRecord, TaskResult, TaskStatus};

/// Terminal outcome reported by a worker.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(TaskResult),
    Failed(String),
}

/// Owns the canonical task records.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new record. Ids must be unique for the registry's lifetime.
    pub async fn insert(&self, record: TaskRecord) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&record.task_id) {
            return Err(TaskError::Duplicate { id: record.task_id });
        }
        tasks.insert(record.task_id, record);
        Ok(())
    }

    /// Get a task by id.
    pub async fn get(&self, id: Uuid) -> Result<TaskRecord, TaskError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TaskError::NotFound { id })
    }

    /// Snapshot of every task.
    pub async fn list(&self) -> Vec<TaskRecord> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Mutate a task under the lock.
    pub async fn update<F, R>(&self, id: Uuid, f: F) -> Result<R, TaskError>
    where
        F: FnOnce(&mut TaskRecord) -> R,
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskError::NotFound { id })?;
        Ok(f(task))
    }

    /// Compare-and-set pending → processing.
    ///
    /// Returns `Ok(None)` when the task is no longer pending (cancelled
    /// before pickup, or already claimed).
    pub async fn claim(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskError> {
        self.update(id, |task| {
            if task.status != TaskStatus::Pending {
                return None;
            }
            task.start().ok()?;
            Some(task.clone())
        })
        .await
    }

    /// Raise progress on a processing task. Returns the updated record if it changed.
    pub async fn progress(&self, id: Uuid, progress: u8) -> Result<Option<TaskRecord>, TaskError> {
        self.update(id, |task| task.set_progress(progress).then(|| task.clone()))
            .await
    }

    /// Cancel a pending or processing task.
    pub async fn cancel(&self, id: Uuid) -> Result<TaskRecord, TaskError> {
        self.update(id, |task| {
            task.cancel()?;
            Ok(task.clone())
        })
        .await?
    }

    /// Write a worker's terminal outcome. Rejected if the task already
    /// reached a terminal state (e.g. it was cancelled mid-analysis).
    pub async fn finish(&self, id: Uuid, outcome: Outcome) -> Result<TaskRecord, TaskError> {
        self.update(id, |task| {
            match outcome {
                Outcome::Completed(result) => task.complete(result)?,
                Outcome::Failed(error) => task.fail(error)?,
            }
            Ok(task.clone())
        })
        .await?
    }

    /// Remove a task.
    pub async fn remove(&self, id: Uuid) -> Result<TaskRecord, TaskError> {
        self.tasks
            .write()
            .await
            .remove(&id)
            .ok_or(TaskError::NotFound { id })
    }

    /// Terminal tasks whose terminal timestamp is at least `max_age` before `now`.
    /// Terminal tasks without a terminal timestamp are skipped.
    pub async fn expired(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<TaskRecord> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| {
                t.terminal_at()
                    .is_some_and(|at| now.signed_duration_since(at) >= max_age)
            })
            .cloned()
            .collect()
    }

    /// Get count of tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Per-status counts.
    pub async fn summary(&self) -> RegistrySummary {
        let tasks = self.tasks.read().await;

        let mut summary = RegistrySummary::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Processing => summary.processing += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }

        summary.total = tasks.len();
        summary
    }
}

/// Summary of all tasks.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}
