//! Background processor — composition root for queue, pool, registry and store.
//!
//! Provides:
//! - `submit()` — validate, record as pending, persist, enqueue; returns at once
//! - `status()` / `list_all()` — lookups against the in-memory registry
//! - `cancel()` — advisory cancellation of pending or processing tasks
//! - `cleanup()` — remove terminal tasks older than a retention window
//! - `start()` / `stop()` — worker lifecycle

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::AnalyzerRegistry;
use crate::config::ProcessorConfig;
use crate::error::{TaskError, ValidationError};
use crate::store::StatusStore;
use crate::worker::hooks::{CompletionHook, LogHook};
use crate::worker::pool::{WorkerDeps, WorkerPool};
use crate::worker::queue::{Job, WorkQueue};
use crate::worker::registry::{RegistrySummary, TaskRegistry};
use crate::worker::request::SubmitRequest;
use crate::worker::state::{TaskRecord, TaskStatus};

/// Error recorded on tasks that were mid-flight when the process went down.
const INTERRUPTED: &str = "Interrupted by restart";

/// Floor for the retention sweep period; `tokio::time::interval` rejects zero.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Runs analysis jobs in the background and tracks their lifecycle.
pub struct Processor {
    config: ProcessorConfig,
    deps: WorkerDeps,
    pool: WorkerPool,
    running: AtomicBool,
}

impl Processor {
    /// Create a stopped processor. Submissions are queued until `start()`.
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn StatusStore>,
        analyzers: AnalyzerRegistry,
    ) -> Self {
        let deps = WorkerDeps::new(
            Arc::new(WorkQueue::new()),
            Arc::new(TaskRegistry::new()),
            store,
            Arc::new(analyzers),
            Arc::new(LogHook),
            config.analysis_timeout,
        );
        Self {
            pool: WorkerPool::new(config.max_workers),
            config,
            deps,
            running: AtomicBool::new(false),
        }
    }

    /// Replace the post-terminal hook.
    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.deps.hook = hook;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Spawn the worker loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.deps.queue.reopen();
        self.pool.start(&self.deps).await;
        info!(workers = self.pool.size(), "Background processor started");
    }

    /// Stop accepting work and wait for in-flight jobs to finish.
    /// Jobs still queued stay pending. Submissions fail from here on,
    /// whether or not the processor was ever started.
    pub async fn stop(&self) {
        self.deps.queue.close();
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.pool.join().await;
        info!(
            queued = self.deps.queue.len(),
            "Background processor stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Submit a job. Returns its id as soon as it is queued.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Uuid, TaskError> {
        if self.deps.queue.is_closed() {
            return Err(TaskError::Shutdown);
        }
        if !self.deps.analyzers.supports(request.kind) {
            return Err(ValidationError::UnsupportedKind { kind: request.kind }.into());
        }

        let submission = request.validate(&self.config)?;
        let record = TaskRecord::new(
            submission.kind,
            submission.parameters,
            submission.callback_url,
        );
        let task_id = record.task_id;
        let kind = record.kind;

        self.deps.registry.insert(record).await?;
        self.deps.persist(task_id).await;

        let job = Job {
            task_id,
            kind,
            content: submission.content,
        };
        if let Err(e) = self.deps.queue.enqueue(job) {
            // Lost a race with stop(); the task never existed.
            self.deps.forget(task_id).await;
            return Err(e);
        }

        info!(task_id = %task_id, kind = %kind, "Task submitted");
        Ok(task_id)
    }

    /// Submit an image analysis job.
    pub async fn submit_image_analysis(
        &self,
        filename: impl Into<String>,
        content: Vec<u8>,
        prompt: Option<String>,
        detail: Option<String>,
        callback_url: Option<String>,
    ) -> Result<Uuid, TaskError> {
        let mut request = SubmitRequest::image_analysis(filename, content);
        request.prompt = prompt;
        request.detail = detail;
        request.callback_url = callback_url;
        self.submit(request).await
    }

    /// Submit a table extraction job.
    pub async fn submit_table_extraction(
        &self,
        filename: impl Into<String>,
        content: Vec<u8>,
        model: Option<String>,
        callback_url: Option<String>,
    ) -> Result<Uuid, TaskError> {
        let mut request = SubmitRequest::table_extraction(filename, content);
        request.model = model;
        request.callback_url = callback_url;
        self.submit(request).await
    }

    /// Current record for `id`.
    pub async fn status(&self, id: Uuid) -> Result<TaskRecord, TaskError> {
        self.deps.registry.get(id).await
    }

    /// Every known task, in no particular order.
    pub async fn list_all(&self) -> Vec<TaskRecord> {
        self.deps.registry.list().await
    }

    /// Cancel a pending or processing task.
    ///
    /// Advisory: a task already inside the analyzer keeps running, but its
    /// result is discarded and the record stays cancelled.
    pub async fn try_cancel(&self, id: Uuid) -> Result<TaskRecord, TaskError> {
        let record = self.deps.registry.cancel(id).await?;
        info!(task_id = %id, "Task cancelled");
        self.deps.on_terminal(&record).await;
        Ok(record)
    }

    /// Like [`try_cancel`](Self::try_cancel), reporting only whether the cancel took effect.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.try_cancel(id).await {
            Ok(_) => true,
            Err(e) => {
                debug!(task_id = %id, error = %e, "Cancel rejected");
                false
            }
        }
    }

    /// Remove terminal tasks whose terminal timestamp is at least `max_age` old,
    /// from both the registry and the store. Returns how many were removed.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let expired = self.deps.registry.expired(max_age, Utc::now()).await;

        let mut removed = 0;
        for record in expired {
            if self.deps.forget(record.task_id).await.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, max_age = ?max_age, "Cleaned up old tasks");
        }
        removed
    }

    /// Reload snapshots left by a previous run.
    ///
    /// Queued bytes do not survive a restart, so tasks that were pending are
    /// marked cancelled and tasks that were processing are marked failed.
    pub async fn recover(&self) -> crate::error::Result<usize> {
        let snapshots = self.deps.store.load_all().await?;

        let mut recovered = 0;
        for mut record in snapshots {
            let task_id = record.task_id;
            let interrupted = match record.status {
                TaskStatus::Pending => record.cancel().is_ok(),
                TaskStatus::Processing => record.fail(INTERRUPTED).is_ok(),
                _ => false,
            };

            if let Err(e) = self.deps.registry.insert(record).await {
                debug!(task_id = %task_id, error = %e, "Skipping recovered snapshot");
                continue;
            }
            if interrupted {
                warn!(task_id = %task_id, "Task was interrupted by restart");
                self.deps.persist(task_id).await;
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered tasks from status store");
        }
        Ok(recovered)
    }

    /// Per-status task counts.
    pub async fn summary(&self) -> RegistrySummary {
        self.deps.registry.summary().await
    }

    /// Jobs waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.deps.queue.len()
    }
}

/// Spawn a background task that periodically removes old terminal tasks.
pub fn spawn_cleanup_task(
    processor: Arc<Processor>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        warn!(
            min = ?MIN_CLEANUP_INTERVAL,
            "Cleanup interval of zero requested, using minimum"
        );
        MIN_CLEANUP_INTERVAL
    } else {
        interval
    };

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        // First tick fires immediately
        loop {
            tick.tick().await;
            processor.cleanup(max_age).await;
        }
    })
}
