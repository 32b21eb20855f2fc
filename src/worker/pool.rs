//! Worker pool — N loops draining the work queue.
//!
//! Each loop takes one job at a time, so at most N analyzer calls are in
//! flight no matter how fast tasks are submitted. Nothing that happens to
//! a single job (analyzer error, panic, persistence failure) ends a loop.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisOutcome, Analyzer, AnalyzerRegistry};
use crate::error::{AnalysisError, TaskError};
use crate::store::StatusStore;
use crate::worker::hooks::CompletionHook;
use crate::worker::queue::{Job, WorkQueue};
use crate::worker::registry::{Outcome, TaskRegistry};
use crate::worker::state::{TaskParameters, TaskRecord, TaskResult};

/// Progress checkpoints written while a task runs.
const PROGRESS_STARTED: u8 = 10;
const PROGRESS_ANALYZING: u8 = 30;
const PROGRESS_ANALYZED: u8 = 80;

/// Everything a worker loop needs, shared with the processor.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<WorkQueue>,
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<dyn StatusStore>,
    pub analyzers: Arc<AnalyzerRegistry>,
    pub hook: Arc<dyn CompletionHook>,
    pub analysis_timeout: Option<Duration>,
    /// Serializes snapshot writes so the last write always carries the
    /// latest in-memory state.
    persist_gate: Arc<Mutex<()>>,
}

impl WorkerDeps {
    pub fn new(
        queue: Arc<WorkQueue>,
        registry: Arc<TaskRegistry>,
        store: Arc<dyn StatusStore>,
        analyzers: Arc<AnalyzerRegistry>,
        hook: Arc<dyn CompletionHook>,
        analysis_timeout: Option<Duration>,
    ) -> Self {
        Self {
            queue,
            registry,
            store,
            analyzers,
            hook,
            analysis_timeout,
            persist_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Write the current in-memory record for `id` to the store.
    /// Failures are logged, never returned.
    pub async fn persist(&self, id: Uuid) {
        let _gate = self.persist_gate.lock().await;
        let Ok(record) = self.registry.get(id).await else {
            return;
        };
        if let Err(e) = self.store.persist(&record).await {
            warn!(task_id = %id, status = %record.status, error = %e, "Failed to persist task status");
        }
    }

    /// Drop a task from the registry and the store, including its result artifact.
    pub async fn forget(&self, id: Uuid) -> Option<TaskRecord> {
        let _gate = self.persist_gate.lock().await;
        let record = self.registry.remove(id).await.ok()?;
        if let Err(e) = self.store.remove(id).await {
            warn!(task_id = %id, error = %e, "Failed to remove task status snapshot");
        }
        if let Some(ref result) = record.result
            && let Err(e) = self.store.remove_result(&result.result_file).await
        {
            warn!(task_id = %id, error = %e, "Failed to remove result artifact");
        }
        Some(record)
    }

    /// Persist and announce a record that just became terminal.
    pub async fn on_terminal(&self, record: &TaskRecord) {
        self.persist(record.task_id).await;
        self.hook.on_terminal(record).await;
    }

    async fn progress(&self, id: Uuid, progress: u8) {
        if let Ok(Some(_)) = self.registry.progress(id, progress).await {
            self.persist(id).await;
        }
    }

    /// Record a worker's terminal outcome. Returns false if it was discarded
    /// because the task already reached a terminal state.
    async fn finish(&self, id: Uuid, outcome: Outcome) -> bool {
        match self.registry.finish(id, outcome).await {
            Ok(record) => {
                match record.error {
                    Some(ref error) => warn!(task_id = %id, error = %error, "Task failed"),
                    None => info!(task_id = %id, elapsed = ?record.elapsed(), "Task completed"),
                }
                self.on_terminal(&record).await;
                true
            }
            Err(TaskError::InvalidTransition { from, .. }) => {
                info!(task_id = %id, status = %from, "Discarding result of task that is already terminal");
                false
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Failed to record task outcome");
                false
            }
        }
    }
}

/// Fixed-size set of worker loops.
pub struct WorkerPool {
    size: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the worker loops. No-op if they are already running.
    pub async fn start(&self, deps: &WorkerDeps) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }
        for worker_id in 0..self.size {
            handles.push(tokio::spawn(worker_loop(worker_id, deps.clone())));
        }
        info!(workers = self.size, "Worker pool started");
    }

    /// Wait for every loop to exit. Loops exit once the queue is closed,
    /// after finishing the job they hold.
    pub async fn join(&self) {
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker loop ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }

    /// Number of loops currently spawned.
    pub async fn running(&self) -> usize {
        self.handles
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}

async fn worker_loop(worker_id: usize, deps: WorkerDeps) {
    debug!(worker_id, "Worker loop started");

    while let Some(job) = deps.queue.dequeue().await {
        let task_id = job.task_id;
        // Each job runs in its own task so a panic anywhere in the pipeline
        // fails that job instead of killing the loop.
        let handle = tokio::spawn(run_job(deps.clone(), job));
        if let Err(e) = handle.await {
            let reason = if e.is_panic() {
                AnalysisError::Panicked(panic_message(e.into_panic())).to_string()
            } else {
                format!("Worker task aborted: {e}")
            };
            error!(worker_id, task_id = %task_id, reason = %reason, "Job crashed");
            deps.finish(task_id, Outcome::Failed(reason)).await;
        }
    }

    debug!(worker_id, "Worker loop exited");
}

async fn run_job(deps: WorkerDeps, job: Job) {
    let Job {
        task_id,
        kind,
        content,
    } = job;

    let record = match deps.registry.claim(task_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            debug!(task_id = %task_id, "Skipping task that is no longer pending");
            return;
        }
        Err(e) => {
            debug!(task_id = %task_id, error = %e, "Skipping task missing from registry");
            return;
        }
    };
    deps.persist(task_id).await;
    info!(task_id = %task_id, kind = %kind, bytes = content.len(), "Task processing started");

    deps.progress(task_id, PROGRESS_STARTED).await;

    let Some(analyzer) = deps.analyzers.get(kind) else {
        let reason = AnalysisError::NoAnalyzer { kind }.to_string();
        deps.finish(task_id, Outcome::Failed(reason)).await;
        return;
    };

    deps.progress(task_id, PROGRESS_ANALYZING).await;
    let outcome = analyze(
        analyzer.as_ref(),
        &content,
        &record.parameters,
        deps.analysis_timeout,
    )
    .await;
    deps.progress(task_id, PROGRESS_ANALYZED).await;

    match outcome {
        Ok(AnalysisOutcome::Success(payload)) => {
            match deps.store.write_result(&record, &payload).await {
                Ok(result_file) => {
                    let result = TaskResult {
                        payload,
                        result_file: result_file.clone(),
                    };
                    if !deps.finish(task_id, Outcome::Completed(result)).await
                        && let Err(e) = deps.store.remove_result(&result_file).await
                    {
                        warn!(task_id = %task_id, error = %e, "Failed to remove discarded result");
                    }
                }
                Err(e) => {
                    let reason = format!("Failed to write result: {e}");
                    deps.finish(task_id, Outcome::Failed(reason)).await;
                }
            }
        }
        Ok(AnalysisOutcome::Failure(reason)) => {
            deps.finish(task_id, Outcome::Failed(reason)).await;
        }
        Err(e) => {
            deps.finish(task_id, Outcome::Failed(e.to_string())).await;
        }
    }
}

async fn analyze(
    analyzer: &dyn Analyzer,
    content: &[u8],
    parameters: &TaskParameters,
    timeout: Option<Duration>,
) -> Result<AnalysisOutcome, AnalysisError> {
    let call = analyzer.analyze(content, parameters);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(AnalysisError::Timeout { timeout: limit })),
        None => call.await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
