//! Forwarding analyzer: posts the upload to a collaborator over HTTP.
//!
//! The collaborator owns the model call and file decoding. It receives a
//! multipart form (`file` plus one text field per parameter) and answers
//! with an [`AnalysisReply`] JSON body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use super::{AnalysisOutcome, AnalysisReply, Analyzer};
use crate::error::AnalysisError;
use crate::worker::state::TaskParameters;

/// Default request timeout for collaborator calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Analyzer backed by a remote HTTP endpoint.
pub struct HttpAnalyzer {
    name: String,
    endpoint: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpAnalyzer {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, AnalysisError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AnalysisError::RequestFailed {
                analyzer: name.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            name,
            endpoint: endpoint.into(),
            token: None,
            client,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_failed(&self, reason: impl std::fmt::Display) -> AnalysisError {
        AnalysisError::RequestFailed {
            analyzer: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        content: &[u8],
        parameters: &TaskParameters,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let filename = parameters
            .get("filename")
            .cloned()
            .unwrap_or_else(|| "upload".to_string());

        let mut form = Form::new().part("file", Part::bytes(content.to_vec()).file_name(filename));
        for (key, value) in parameters {
            form = form.text(key.clone(), value.clone());
        }

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| self.request_failed(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(self.request_failed(format!("HTTP {status}: {snippet}")));
        }

        let reply: AnalysisReply =
            response
                .json()
                .await
                .map_err(|e| AnalysisError::InvalidResponse {
                    analyzer: self.name.clone(),
                    reason: e.to_string(),
                })?;

        tracing::debug!(
            analyzer = %self.name,
            success = reply.success,
            "Analyzer replied"
        );

        Ok(reply.into())
    }
}
