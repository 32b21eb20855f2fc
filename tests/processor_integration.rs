//! Integration tests for the background processor.
//!
//! Analyzers here are in-process stubs: some sleep, some block on a
//! semaphore the test releases, some fail or panic. Each test runs under
//! `TEST_TIMEOUT` so a stuck worker fails fast instead of hanging CI.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};

use doc_analysis::analysis::{AnalysisOutcome, Analyzer, AnalyzerRegistry};
use doc_analysis::config::ProcessorConfig;
use doc_analysis::error::{AnalysisError, StoreError, TaskError};
use doc_analysis::store::{FileStatusStore, MemoryStatusStore, StatusStore};
use doc_analysis::worker::{
    CompletionHook, Processor, SubmitRequest, TaskKind, TaskParameters, TaskRecord, TaskStatus,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ── Stub analyzers ───────────────────────────────────────────────────

/// Sleeps, then returns a fixed payload.
struct Sleepy {
    delay: Duration,
    payload: serde_json::Value,
    calls: AtomicUsize,
}

impl Sleepy {
    fn new(delay: Duration, payload: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            delay,
            payload,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Analyzer for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }

    async fn analyze(
        &self,
        _content: &[u8],
        _parameters: &TaskParameters,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        Ok(AnalysisOutcome::success(self.payload.clone()))
    }
}

/// Blocks until the test adds permits, tracking how many calls run at once.
struct Gated {
    permits: Semaphore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Gated {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

#[async_trait]
impl Analyzer for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    async fn analyze(
        &self,
        content: &[u8],
        _parameters: &TaskParameters,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let permit = self.permits.acquire().await.map_err(|e| AnalysisError::Rejected(e.to_string()))?;
        permit.forget();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(AnalysisOutcome::success(serde_json::json!({"bytes": content.len()})))
    }
}

/// Fails according to the file name it is given.
struct Faulty;

#[async_trait]
impl Analyzer for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn analyze(
        &self,
        _content: &[u8],
        parameters: &TaskParameters,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        match parameters.get("filename").map(String::as_str) {
            Some("reject.png") => Ok(AnalysisOutcome::failure("No text found in image")),
            Some("error.png") => Err(AnalysisError::RequestFailed {
                analyzer: "faulty".into(),
                reason: "connection refused".into(),
            }),
            Some("panic.png") => panic!("decoder exploded"),
            _ => Ok(AnalysisOutcome::success(serde_json::json!({"ok": true}))),
        }
    }
}

/// Counts terminal notifications.
#[derive(Default)]
struct CountingHook {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionHook for CountingHook {
    async fn on_terminal(&self, _record: &TaskRecord) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Store whose snapshot writes always fail.
struct BrokenStore {
    inner: MemoryStatusStore,
}

#[async_trait]
impl StatusStore for BrokenStore {
    async fn persist(&self, _record: &TaskRecord) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }
    async fn remove(&self, id: uuid::Uuid) -> Result<(), StoreError> {
        self.inner.remove(id).await
    }
    async fn load(&self, id: uuid::Uuid) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.load(id).await
    }
    async fn load_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.load_all().await
    }
    async fn write_result(
        &self,
        record: &TaskRecord,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, StoreError> {
        self.inner.write_result(record, payload).await
    }
    async fn remove_result(&self, path: &std::path::Path) -> Result<(), StoreError> {
        self.inner.remove_result(path).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn config(workers: usize) -> ProcessorConfig {
    ProcessorConfig {
        max_workers: workers,
        ..ProcessorConfig::default()
    }
}

fn image(name: &str) -> SubmitRequest {
    SubmitRequest::image_analysis(name, vec![7; 10])
}

fn processor_with(
    workers: usize,
    kind: TaskKind,
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn StatusStore>,
) -> Processor {
    let analyzers = AnalyzerRegistry::new().with(kind, analyzer);
    Processor::new(config(workers), store, analyzers)
}

/// Poll until the task reaches `status`; callers bound this with `TEST_TIMEOUT`.
async fn wait_for_status(processor: &Processor, id: uuid::Uuid, status: TaskStatus) -> TaskRecord {
    loop {
        let record = processor.status(id).await.unwrap();
        if record.status == status {
            return record;
        }
        sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_until<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    while !check() {
        sleep(Duration::from_millis(5)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn table_extraction_end_to_end() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStatusStore::new(dir.path()).await.unwrap());
        let analyzer = Sleepy::new(
            Duration::from_millis(100),
            serde_json::json!({"table_count": 2}),
        );
        let processor = processor_with(
            3,
            TaskKind::TableExtraction,
            analyzer,
            Arc::clone(&store) as Arc<dyn StatusStore>,
        );
        processor.start().await;

        let id = processor
            .submit(SubmitRequest::table_extraction("report.pdf", vec![0; 10]))
            .await
            .unwrap();

        let first = processor.status(id).await.unwrap();
        assert_eq!(first.status, TaskStatus::Pending);
        assert_eq!(first.progress, 0);
        assert_eq!(first.parameter("model"), Some("gpt-4o"));

        sleep(Duration::from_millis(300)).await;

        let done = processor.status(id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.created_at <= done.started_at.unwrap());
        let result = done.result.as_ref().unwrap();
        assert_eq!(result.payload["table_count"], 2);

        // Artifact and snapshot are both on disk.
        let artifact: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&result.result_file).unwrap()).unwrap();
        assert_eq!(artifact["table_count"], 2);
        let snapshot = store.load(id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn single_worker_runs_jobs_in_order() {
    timeout(TEST_TIMEOUT, async {
        let analyzer = Sleepy::new(Duration::from_millis(100), serde_json::json!({}));
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            analyzer,
            Arc::new(MemoryStatusStore::new()),
        );
        processor.start().await;

        let first = processor.submit(image("one.png")).await.unwrap();
        let second = processor.submit(image("two.png")).await.unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.status(first).await.unwrap().status, TaskStatus::Processing);
        assert_eq!(processor.status(second).await.unwrap().status, TaskStatus::Pending);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(processor.status(first).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(processor.status(second).await.unwrap().status, TaskStatus::Completed);

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn status_unknown_id_is_not_found() {
    let processor = processor_with(
        1,
        TaskKind::ImageAnalysis,
        Arc::new(Faulty),
        Arc::new(MemoryStatusStore::new()),
    );
    let id = uuid::Uuid::new_v4();
    assert!(matches!(
        processor.status(id).await,
        Err(TaskError::NotFound { .. })
    ));
    assert!(!processor.cancel(id).await);
}

#[tokio::test]
async fn pool_bounds_concurrent_processing() {
    timeout(TEST_TIMEOUT, async {
        let gated = Gated::new();
        let processor = processor_with(
            2,
            TaskKind::ImageAnalysis,
            Arc::clone(&gated) as Arc<dyn Analyzer>,
            Arc::new(MemoryStatusStore::new()),
        );
        processor.start().await;

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(processor.submit(image(&format!("{i}.png"))).await.unwrap());
        }

        wait_until(|| gated.in_flight.load(Ordering::SeqCst) == 2).await;
        // Give any over-eager worker a chance to misbehave.
        sleep(Duration::from_millis(50)).await;

        let summary = processor.summary().await;
        assert_eq!(summary.processing, 2);
        assert_eq!(summary.pending, 3);

        gated.release(5);
        for id in &ids {
            wait_for_status(&processor, *id, TaskStatus::Completed).await;
        }

        assert_eq!(gated.peak.load(Ordering::SeqCst), 2);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 5);
        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancel_before_pickup_skips_analyzer() {
    timeout(TEST_TIMEOUT, async {
        let analyzer = Sleepy::new(Duration::from_millis(1), serde_json::json!({}));
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::clone(&analyzer) as Arc<dyn Analyzer>,
            Arc::new(MemoryStatusStore::new()),
        );

        let id = processor.submit(image("a.png")).await.unwrap();
        assert!(processor.cancel(id).await);

        processor.start().await;
        // A later job proves the worker drained the cancelled one.
        let later = processor.submit(image("b.png")).await.unwrap();
        wait_for_status(&processor, later, TaskStatus::Completed).await;

        let cancelled = processor.status(id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.started_at.is_none());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancel_during_processing_discards_result() {
    timeout(TEST_TIMEOUT, async {
        let gated = Gated::new();
        let store = Arc::new(MemoryStatusStore::new());
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::clone(&gated) as Arc<dyn Analyzer>,
            Arc::clone(&store) as Arc<dyn StatusStore>,
        );
        processor.start().await;

        let id = processor.submit(image("a.png")).await.unwrap();
        wait_until(|| gated.in_flight.load(Ordering::SeqCst) == 1).await;

        assert!(processor.cancel(id).await);
        gated.release(1);

        // Queue a follow-up so we know the worker finished the cancelled job.
        let next = processor.submit(image("b.png")).await.unwrap();
        gated.release(1);
        wait_for_status(&processor, next, TaskStatus::Completed).await;

        let record = processor.status(id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.result.is_none());
        assert!(record.completed_at.is_none());
        assert_eq!(store.load(id).await.unwrap().unwrap().status, TaskStatus::Cancelled);

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn terminal_tasks_cannot_be_cancelled() {
    timeout(TEST_TIMEOUT, async {
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::new(Faulty),
            Arc::new(MemoryStatusStore::new()),
        );
        processor.start().await;

        let ok = processor.submit(image("fine.png")).await.unwrap();
        let bad = processor.submit(image("reject.png")).await.unwrap();
        let completed = wait_for_status(&processor, ok, TaskStatus::Completed).await;
        let failed = wait_for_status(&processor, bad, TaskStatus::Failed).await;

        assert!(!processor.cancel(ok).await);
        assert!(!processor.cancel(bad).await);
        assert!(matches!(
            processor.try_cancel(ok).await,
            Err(TaskError::NotCancellable { status: TaskStatus::Completed, .. })
        ));

        assert_eq!(processor.status(ok).await.unwrap(), completed);
        assert_eq!(processor.status(bad).await.unwrap(), failed);

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn analyzer_failures_become_failed_tasks() {
    timeout(TEST_TIMEOUT, async {
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::new(Faulty),
            Arc::new(MemoryStatusStore::new()),
        );
        processor.start().await;

        let rejected = processor.submit(image("reject.png")).await.unwrap();
        let errored = processor.submit(image("error.png")).await.unwrap();
        let panicked = processor.submit(image("panic.png")).await.unwrap();
        let after = processor.submit(image("after.png")).await.unwrap();

        let record = wait_for_status(&processor, rejected, TaskStatus::Failed).await;
        assert_eq!(record.error.as_deref(), Some("No text found in image"));
        assert!(record.failed_at.is_some());
        assert!(record.result.is_none());

        let record = wait_for_status(&processor, errored, TaskStatus::Failed).await;
        assert!(record.error.unwrap().contains("connection refused"));

        let record = wait_for_status(&processor, panicked, TaskStatus::Failed).await;
        assert!(record.error.unwrap().contains("decoder exploded"));

        // The single worker loop survived all three.
        wait_for_status(&processor, after, TaskStatus::Completed).await;

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn analysis_timeout_fails_task() {
    timeout(TEST_TIMEOUT, async {
        let analyzer = Sleepy::new(Duration::from_secs(5), serde_json::json!({}));
        let analyzers = AnalyzerRegistry::new().with(TaskKind::ImageAnalysis, analyzer);
        let config = ProcessorConfig {
            max_workers: 1,
            analysis_timeout: Some(Duration::from_millis(50)),
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, Arc::new(MemoryStatusStore::new()), analyzers);
        processor.start().await;

        let id = processor.submit(image("slow.png")).await.unwrap();
        let record = wait_for_status(&processor, id, TaskStatus::Failed).await;
        assert!(record.error.unwrap().contains("timed out"));

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn persistence_failures_do_not_fail_tasks() {
    timeout(TEST_TIMEOUT, async {
        let store = Arc::new(BrokenStore {
            inner: MemoryStatusStore::new(),
        });
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::new(Faulty),
            store,
        );
        processor.start().await;

        let id = processor.submit(image("fine.png")).await.unwrap();
        wait_for_status(&processor, id, TaskStatus::Completed).await;

        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cleanup_zero_removes_terminal_tasks_everywhere() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStatusStore::new(dir.path()).await.unwrap());
        let gated = Gated::new();
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::clone(&gated) as Arc<dyn Analyzer>,
            Arc::clone(&store) as Arc<dyn StatusStore>,
        );
        processor.start().await;

        let done = processor.submit(image("done.png")).await.unwrap();
        gated.release(1);
        let record = wait_for_status(&processor, done, TaskStatus::Completed).await;
        let artifact = record.result.unwrap().result_file;
        assert!(artifact.exists());

        // Still running: must survive cleanup.
        let live = processor.submit(image("live.png")).await.unwrap();
        wait_until(|| gated.in_flight.load(Ordering::SeqCst) == 1).await;

        assert_eq!(processor.cleanup(Duration::ZERO).await, 1);

        assert!(matches!(
            processor.status(done).await,
            Err(TaskError::NotFound { .. })
        ));
        assert!(store.load(done).await.unwrap().is_none());
        assert!(!store.status_path(done).exists());
        assert!(!artifact.exists());
        assert_eq!(processor.status(live).await.unwrap().status, TaskStatus::Processing);

        gated.release(1);
        wait_for_status(&processor, live, TaskStatus::Completed).await;
        processor.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cleanup_keeps_recent_tasks() {
    timeout(TEST_TIMEOUT, async {
        let processor = processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::new(Faulty),
            Arc::new(MemoryStatusStore::new()),
        );
        let id = processor.submit(image("a.png")).await.unwrap();
        processor.cancel(id).await;

        assert_eq!(processor.cleanup(Duration::from_secs(3600)).await, 0);
        assert!(processor.status(id).await.is_ok());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stop_waits_for_in_flight_job_and_leaves_queue_pending() {
    timeout(TEST_TIMEOUT, async {
        let gated = Gated::new();
        let processor = Arc::new(processor_with(
            1,
            TaskKind::ImageAnalysis,
            Arc::clone(&gated) as Arc<dyn Analyzer>,
            Arc::new(MemoryStatusStore::new()),
        ));
        processor.start().await;

        let running = processor.submit(image("a.png")).await.unwrap();
        let queued = processor.submit(image("b.png")).await.unwrap();
        wait_until(|| gated.in_flight.load(Ordering::SeqCst) == 1).await;

        let stopper = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.stop().await })
        };
        sleep(Duration::from_millis(50)).await;
        assert!(!stopper.is_finished(), "stop must wait for the in-flight job");

        gated.release(1);
        stopper.await.unwrap();

        assert_eq!(processor.status(running).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(processor.status(queued).await.unwrap().status, TaskStatus::Pending);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            processor.submit(image("c.png")).await,
            Err(TaskError::Shutdown)
        ));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stop_before_start_rejects_submissions() {
    let processor = processor_with(
        1,
        TaskKind::ImageAnalysis,
        Arc::new(Faulty),
        Arc::new(MemoryStatusStore::new()),
    );
    processor.stop().await;

    assert!(matches!(
        processor.submit(image("a.png")).await,
        Err(TaskError::Shutdown)
    ));
    assert!(processor.list_all().await.is_empty());
}

#[tokio::test]
async fn hook_fires_once_per_terminal_task() {
    timeout(TEST_TIMEOUT, async {
        let hook = Arc::new(CountingHook::default());
        let analyzers = AnalyzerRegistry::new().with(TaskKind::ImageAnalysis, Arc::new(Faulty));
        let processor = Processor::new(config(2), Arc::new(MemoryStatusStore::new()), analyzers)
            .with_hook(Arc::clone(&hook) as Arc<dyn CompletionHook>);

        let cancelled = processor.submit(image("x.png")).await.unwrap();
        processor.cancel(cancelled).await;
        processor.cancel(cancelled).await;

        processor.start().await;
        let ok = processor.submit(image("ok.png")).await.unwrap();
        let bad = processor.submit(image("reject.png")).await.unwrap();
        wait_for_status(&processor, ok, TaskStatus::Completed).await;
        wait_for_status(&processor, bad, TaskStatus::Failed).await;

        // The hook runs after the status flip and the snapshot write.
        wait_until(|| hook.calls.load(Ordering::SeqCst) >= 3).await;
        processor.stop().await;
        assert_eq!(hook.calls.load(Ordering::SeqCst), 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn list_all_returns_every_task() {
    let processor = processor_with(
        1,
        TaskKind::ImageAnalysis,
        Arc::new(Faulty),
        Arc::new(MemoryStatusStore::new()),
    );
    let a = processor.submit(image("a.png")).await.unwrap();
    let b = processor.submit(image("b.png")).await.unwrap();

    let mut ids: Vec<_> = processor.list_all().await.iter().map(|t| t.task_id).collect();
    ids.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(ids, expected);
}
