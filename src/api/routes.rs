//! REST endpoints for background analysis tasks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config;
use crate::error::TaskError;
use crate::worker::{Processor, SubmitRequest, TaskKind};

/// Headroom on top of the upload limit for multipart framing and text fields.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<Processor>,
}

/// Build the Axum router for the background task API.
pub fn task_routes(processor: Arc<Processor>) -> Router {
    let body_limit = processor.config().max_upload_bytes + FORM_OVERHEAD_BYTES;
    let state = AppState { processor };

    Router::new()
        .route("/health", get(health))
        .route("/background/analyze-image", post(analyze_image))
        .route("/background/extract-tables", post(extract_tables))
        .route("/background/task-status/{id}", get(task_status))
        .route("/background/all-tasks", get(all_tasks))
        .route("/background/cancel-task/{id}", delete(cancel_task))
        .route("/background/cleanup", post(cleanup))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.processor.summary().await;
    Json(serde_json::json!({
        "status": "ok",
        "service": "doc-analysis",
        "running": state.processor.is_running(),
        "queued": state.processor.queue_depth(),
        "tasks": summary,
    }))
}

// ── Errors ──────────────────────────────────────────────────────────────

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"success": false, "error": message.into()})),
    )
        .into_response()
}

fn task_error_response(e: &TaskError) -> Response {
    let status = match e {
        TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
        TaskError::Validation(_) | TaskError::NotCancellable { .. } => StatusCode::BAD_REQUEST,
        TaskError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        TaskError::InvalidTransition { .. } | TaskError::Duplicate { .. } => StatusCode::CONFLICT,
    };
    error_response(status, e.to_string())
}

fn parse_task_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid task ID"))
}

// ── Submission ──────────────────────────────────────────────────────────

/// Multipart upload: one `file` part plus plain text fields.
#[derive(Default)]
struct UploadForm {
    filename: String,
    content: Vec<u8>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    /// Non-empty text field.
    fn take(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key).filter(|v| !v.trim().is_empty())
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, Response> {
    let bad_request =
        |e: axum::extract::multipart::MultipartError| {
            error_response(StatusCode::BAD_REQUEST, format!("Invalid multipart body: {e}"))
        };

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.filename = field.file_name().unwrap_or_default().to_string();
            form.content = field.bytes().await.map_err(bad_request)?.to_vec();
        } else {
            let value = field.text().await.map_err(bad_request)?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

async fn submit(state: &AppState, request: SubmitRequest, message: &str) -> Response {
    let kind = request.kind;
    match state.processor.submit(request).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "success": true,
                "message": message,
                "task_id": task_id,
                "status": "pending",
                "check_status_url": format!("/background/task-status/{task_id}"),
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(kind = %kind, error = %e, "Rejected background submission");
            task_error_response(&e)
        }
    }
}

async fn analyze_image(State(state): State<AppState>, multipart: Multipart) -> Response {
    let mut form = match read_upload(multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let mut request = SubmitRequest::new(
        TaskKind::ImageAnalysis,
        std::mem::take(&mut form.filename),
        std::mem::take(&mut form.content),
    );
    request.prompt = form.take("prompt");
    request.detail = form.take("detail");
    request.callback_url = form.take("callback_url");

    submit(&state, request, "Image analysis started in the background.").await
}

async fn extract_tables(State(state): State<AppState>, multipart: Multipart) -> Response {
    let mut form = match read_upload(multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let mut request = SubmitRequest::new(
        TaskKind::TableExtraction,
        std::mem::take(&mut form.filename),
        std::mem::take(&mut form.content),
    );
    request.model = form.take("model");
    request.callback_url = form.take("callback_url");

    submit(&state, request, "Table extraction started in the background.").await
}

// ── Polling ─────────────────────────────────────────────────────────────

async fn task_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let task_id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.processor.status(task_id).await {
        Ok(record) => (
            StatusCode::OK,
            Json(serde_json::json!({"success": true, "task_status": record})),
        )
            .into_response(),
        Err(e) => task_error_response(&e),
    }
}

async fn all_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let tasks = state.processor.list_all().await;
    Json(serde_json::json!({
        "success": true,
        "total_count": tasks.len(),
        "tasks": tasks,
    }))
}

async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let task_id = match parse_task_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.processor.try_cancel(task_id).await {
        Ok(_) => {
            info!(task_id = %task_id, "Task cancelled via API");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "message": format!("Task '{task_id}' was cancelled."),
                })),
            )
                .into_response()
        }
        Err(e) => {
            debug!(task_id = %task_id, error = %e, "Cancel via API rejected");
            task_error_response(&e)
        }
    }
}

#[derive(Deserialize)]
struct CleanupParams {
    max_age_hours: Option<u64>,
}

async fn cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> impl IntoResponse {
    let max_age = params
        .max_age_hours
        .map(config::hours)
        .unwrap_or(state.processor.config().retention);

    let removed = state.processor.cleanup(max_age).await;
    Json(serde_json::json!({
        "success": true,
        "message": format!("Removed finished tasks older than {} hours.", max_age.as_secs() / 3600),
        "removed": removed,
    }))
}
