//! Background task processor.
//!
//! Core components:
//! - `state` — Task record and state machine (Pending → Processing → Completed/Failed, or Cancelled)
//! - `queue` — Unbounded FIFO work queue
//! - `pool` — Fixed-size worker pool running the analyzers
//! - `registry` — In-memory index of tasks (status, cancel, retention)
//! - `request` — Submission validation
//! - `hooks` — Post-terminal hook
//! - `processor` — Composition root tying the above together

pub mod hooks;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod request;
pub mod state;

pub use hooks::{CompletionHook, LogHook};
pub use processor::{Processor, spawn_cleanup_task};
pub use registry::{RegistrySummary, TaskRegistry};
pub use request::SubmitRequest;
pub use state::{TaskKind, TaskParameters, TaskRecord, TaskResult, TaskStatus};
