//! Error types for the analysis service.

use std::time::Duration;

use uuid::Uuid;

use crate::worker::state::{TaskKind, TaskStatus};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Submission rejected before a task record is created.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing filename")]
    MissingFilename,

    #[error("Unsupported file format '{extension}' for {kind}. Supported: {supported}")]
    UnsupportedFormat {
        kind: TaskKind,
        extension: String,
        supported: String,
    },

    #[error("Empty file")]
    EmptyPayload,

    #[error("File too large: {size} bytes exceeds {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid parameter {key}: {message}")]
    InvalidParameter { key: String, message: String },

    #[error("No analyzer registered for {kind}")]
    UnsupportedKind { kind: TaskKind },
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} is {status} and cannot be cancelled")]
    NotCancellable { id: Uuid, status: TaskStatus },

    #[error("Task {id} already in state {from}, cannot transition to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {id} already registered")]
    Duplicate { id: Uuid },

    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Processor is shut down, submission rejected")]
    Shutdown,
}

/// Status snapshot / result artifact persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the external analysis collaborator.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Rejected(String),

    #[error("Analyzer {analyzer} request failed: {reason}")]
    RequestFailed { analyzer: String, reason: String },

    #[error("Invalid response from {analyzer}: {reason}")]
    InvalidResponse { analyzer: String, reason: String },

    #[error("Analysis timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Analysis panicked: {0}")]
    Panicked(String),

    #[error("No analyzer registered for {kind}")]
    NoAnalyzer { kind: TaskKind },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
