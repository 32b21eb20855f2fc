//! Analyzer boundary — the external analysis call, seen from the processor.
//!
//! The processor never talks to a vision/language model directly. Each task
//! kind maps to an [`Analyzer`] that takes the uploaded bytes plus the
//! submission parameters and reports success with a JSON payload or failure
//! with a message.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::worker::state::{TaskKind, TaskParameters};

pub use http::HttpAnalyzer;

/// Result of one analysis call.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl AnalysisOutcome {
    pub fn success(payload: serde_json::Value) -> Self {
        Self::Success(payload)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Wire shape: `{"success": true, "payload": ...}` or `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<AnalysisReply> for AnalysisOutcome {
    fn from(reply: AnalysisReply) -> Self {
        if reply.success {
            Self::Success(reply.payload.unwrap_or(serde_json::Value::Null))
        } else {
            Self::Failure(reply.error.unwrap_or_else(|| "Unknown error".to_string()))
        }
    }
}

impl From<AnalysisOutcome> for AnalysisReply {
    fn from(outcome: AnalysisOutcome) -> Self {
        match outcome {
            AnalysisOutcome::Success(payload) => Self {
                success: true,
                payload: Some(payload),
                error: None,
            },
            AnalysisOutcome::Failure(error) => Self {
                success: false,
                payload: None,
                error: Some(error),
            },
        }
    }
}

/// An external analysis function for one task kind.
///
/// Implementations must be safe to call from several workers at once and
/// must not block indefinitely.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Analyze `content`. `Err` and `Ok(Failure)` both end the task as failed.
    async fn analyze(
        &self,
        content: &[u8],
        parameters: &TaskParameters,
    ) -> Result<AnalysisOutcome, AnalysisError>;
}

/// Analyzers keyed by task kind. Built once at startup.
#[derive(Default, Clone)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<TaskKind, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the analyzer for `kind`.
    pub fn register(&mut self, kind: TaskKind, analyzer: Arc<dyn Analyzer>) {
        tracing::debug!(kind = %kind, analyzer = analyzer.name(), "Registered analyzer");
        self.analyzers.insert(kind, analyzer);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, kind: TaskKind, analyzer: Arc<dyn Analyzer>) -> Self {
        self.register(kind, analyzer);
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.get(&kind).cloned()
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        self.analyzers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.analyzers.keys().copied().collect()
    }
}
