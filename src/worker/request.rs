//! Submission requests and their validation.
//!
//! A request that fails validation never becomes a task record and never
//! reaches the queue.

use std::path::Path;

use crate::config::ProcessorConfig;
use crate::error::ValidationError;
use crate::worker::state::{TaskKind, TaskParameters};

/// Prompt used for image analysis when the caller doesn't supply one.
pub const DEFAULT_PROMPT: &str = "Analyze this image and describe its main content.";

const IMAGE_FORMATS: &[&str] = &["png", "jpg", "jpeg", "tiff", "bmp", "webp", "gif"];
const DOCUMENT_FORMATS: &[&str] = &["pdf", "docx", "xlsx", "xls"];
const DETAIL_LEVELS: &[&str] = &["low", "high", "auto"];

/// Parameter keys recorded on task records.
pub mod params {
    pub const FILENAME: &str = "filename";
    pub const PROMPT: &str = "prompt";
    pub const DETAIL: &str = "detail";
    pub const MODEL: &str = "model";
}

/// A raw upload plus job parameters, as received from a caller.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: TaskKind,
    pub filename: String,
    pub content: Vec<u8>,
    pub prompt: Option<String>,
    pub detail: Option<String>,
    pub model: Option<String>,
    pub callback_url: Option<String>,
}

/// A request that passed validation, with defaults filled in.
#[derive(Debug, Clone)]
pub struct ValidatedSubmission {
    pub kind: TaskKind,
    pub content: Vec<u8>,
    pub parameters: TaskParameters,
    pub callback_url: Option<String>,
}

impl SubmitRequest {
    pub fn new(kind: TaskKind, filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            kind,
            filename: filename.into(),
            content,
            prompt: None,
            detail: None,
            model: None,
            callback_url: None,
        }
    }

    pub fn image_analysis(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(TaskKind::ImageAnalysis, filename, content)
    }

    pub fn table_extraction(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self::new(TaskKind::TableExtraction, filename, content)
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Check the upload against `config` and build the immutable parameter map.
    pub fn validate(self, config: &ProcessorConfig) -> Result<ValidatedSubmission, ValidationError> {
        let filename = self.filename.trim().to_string();
        if filename.is_empty() {
            return Err(ValidationError::MissingFilename);
        }

        let extension = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let supported = supported_formats(self.kind);
        if !supported.contains(&extension.as_str()) {
            return Err(ValidationError::UnsupportedFormat {
                kind: self.kind,
                extension: format!(".{extension}"),
                supported: supported
                    .iter()
                    .map(|e| format!(".{e}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        if self.content.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        if self.content.len() > config.max_upload_bytes {
            return Err(ValidationError::TooLarge {
                size: self.content.len(),
                max: config.max_upload_bytes,
            });
        }

        let callback_url = match self.callback_url.map(|u| u.trim().to_string()) {
            Some(url) if url.is_empty() => None,
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => Some(url),
            Some(url) => {
                return Err(ValidationError::InvalidParameter {
                    key: "callback_url".to_string(),
                    message: format!("'{url}' is not an http(s) URL"),
                });
            }
            None => None,
        };

        let mut parameters = TaskParameters::new();
        parameters.insert(params::FILENAME.to_string(), filename);

        match self.kind {
            TaskKind::ImageAnalysis => {
                let prompt = self
                    .prompt
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
                // Unknown detail levels fall back to "auto".
                let detail = self
                    .detail
                    .map(|d| d.trim().to_ascii_lowercase())
                    .filter(|d| DETAIL_LEVELS.contains(&d.as_str()))
                    .unwrap_or_else(|| "auto".to_string());
                parameters.insert(params::PROMPT.to_string(), prompt);
                parameters.insert(params::DETAIL.to_string(), detail);
            }
            TaskKind::TableExtraction => {
                let model = self
                    .model
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| config.default_model.clone());
                parameters.insert(params::MODEL.to_string(), model);
            }
        }

        Ok(ValidatedSubmission {
            kind: self.kind,
            content: self.content,
            parameters,
            callback_url,
        })
    }
}

/// File extensions (lowercase, no dot) accepted for `kind`.
pub fn supported_formats(kind: TaskKind) -> Vec<&'static str> {
    match kind {
        TaskKind::ImageAnalysis => IMAGE_FORMATS.to_vec(),
        TaskKind::TableExtraction => DOCUMENT_FORMATS
            .iter()
            .chain(IMAGE_FORMATS)
            .copied()
            .collect(),
    }
}
