//! Post-terminal hooks.
//!
//! The processor calls a [`CompletionHook`] once per task, with the final
//! record, right after the task reaches a terminal state. Delivering the
//! requested callback is up to the hook implementation.

use async_trait::async_trait;
use tracing::info;

use crate::worker::state::TaskRecord;

#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_terminal(&self, record: &TaskRecord);
}

/// Logs terminal tasks and any callback the submitter asked for.
pub struct LogHook;

#[async_trait]
impl CompletionHook for LogHook {
    async fn on_terminal(&self, record: &TaskRecord) {
        info!(
            task_id = %record.task_id,
            kind = %record.kind,
            status = %record.status,
            callback_url = record.callback_url.as_deref().unwrap_or("-"),
            "Task reached terminal state"
        );
    }
}
