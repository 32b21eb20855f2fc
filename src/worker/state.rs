//! Task record and its state machine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Job-specific inputs captured at submission (filename, prompt, detail, model).
pub type TaskParameters = BTreeMap<String, String>;

/// State of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is running the analysis.
    Processing,
    /// Analysis succeeded and the result was written.
    Completed,
    /// Analysis or the pipeline around it failed.
    Failed,
    /// Cancelled before reaching another terminal state.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the task is still live (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Kind of analysis a task runs. Selects the analyzer and the valid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ImageAnalysis,
    TableExtraction,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageAnalysis => "image_analysis",
            Self::TableExtraction => "table_extraction",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image_analysis" => Ok(Self::ImageAnalysis),
            "table_extraction" => Ok(Self::TableExtraction),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// Output of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Payload returned by the analyzer.
    pub payload: serde_json::Value,
    /// Where the payload was durably written.
    pub result_file: PathBuf,
}

/// Identity and lifecycle of one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub parameters: TaskParameters,
    pub status: TaskStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl TaskRecord {
    /// Create a pending record with a fresh id.
    pub fn new(kind: TaskKind, parameters: TaskParameters, callback_url: Option<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            kind,
            parameters,
            status: TaskStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            result: None,
            error: None,
            callback_url,
        }
    }

    /// Look up a submission parameter.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    fn transition_to(&mut self, target: TaskStatus) -> Result<DateTime<Utc>, TaskError> {
        if !self.status.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                id: self.task_id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(Utc::now())
    }

    /// pending → processing.
    pub fn start(&mut self) -> Result<(), TaskError> {
        let now = self.transition_to(TaskStatus::Processing)?;
        // created_at <= started_at even if the wall clock stepped backwards.
        self.started_at = Some(now.max(self.created_at));
        Ok(())
    }

    /// processing → completed.
    pub fn complete(&mut self, result: TaskResult) -> Result<(), TaskError> {
        let now = self.transition_to(TaskStatus::Completed)?;
        self.completed_at = Some(now);
        self.progress = 100;
        self.result = Some(result);
        Ok(())
    }

    /// processing → failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        let now = self.transition_to(TaskStatus::Failed)?;
        self.failed_at = Some(now);
        self.error = Some(error.into());
        Ok(())
    }

    /// pending | processing → cancelled.
    pub fn cancel(&mut self) -> Result<(), TaskError> {
        let now = self.transition_to(TaskStatus::Cancelled).map_err(|_| {
            TaskError::NotCancellable {
                id: self.task_id,
                status: self.status,
            }
        })?;
        self.cancelled_at = Some(now);
        Ok(())
    }

    /// Raise progress while processing. Returns false if the value would
    /// go backwards or the task is not processing.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.status != TaskStatus::Processing || progress < self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    /// The single terminal timestamp, if the task has reached one.
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.failed_at).or(self.cancelled_at)
    }

    /// Time spent since the task was picked up.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.terminal_at().unwrap_or_else(Utc::now);
            end.signed_duration_since(start)
                .to_std()
                .unwrap_or_default()
        })
    }
}
