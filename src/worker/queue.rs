//! Work queue — unbounded FIFO hand-off from submitters to the worker group.
//!
//! Any number of producers enqueue; the worker loops share one receiver.
//! Closing the queue wakes every waiting worker with "no more work" but
//! leaves undelivered jobs in the channel, so reopening resumes them.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use uuid::Uuid;

use crate::error::TaskError;
use crate::worker::state::TaskKind;

/// One queued unit of work. Parameters live on the task record.
#[derive(Debug)]
pub struct Job {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub content: Vec<u8>,
}

/// Unbounded, ordered, single-consumer-group queue.
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
    closed: watch::Sender<bool>,
    depth: AtomicUsize,
}

impl WorkQueue {
    /// Create an open queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            rx: Mutex::new(rx),
            closed,
            depth: AtomicUsize::new(0),
        }
    }

    /// Add a job. Never blocks; fails only once the queue is closed.
    pub fn enqueue(&self, job: Job) -> Result<(), TaskError> {
        if self.is_closed() {
            return Err(TaskError::Shutdown);
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.tx.send(job).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            TaskError::Shutdown
        })
    }

    /// Wait for the next job. Returns `None` once the queue is closed,
    /// even if jobs remain.
    pub async fn dequeue(&self) -> Option<Job> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return None;
        }

        let mut rx = tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => return None,
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => None,
            job = rx.recv() => {
                if job.is_some() {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                }
                job
            }
        }
    }

    /// Stop handing out work and reject new jobs.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Accept and hand out work again.
    pub fn reopen(&self) {
        self.closed.send_replace(false);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Number of jobs waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
