//! HTTP server.
//!
//! Exposes reconciliation to the chat backend and its admin UI.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload-gemini-files` | Reconcile one record: `{"fileId": "<id>"}` |
//! | `GET`  | `/files/active` | ACTIVE records as chat file parts |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Response Contract
//!
//! ```json
//! { "success": true, "message": "File uploaded successfully", "outcome": "uploaded",
//!   "gemini_uri": "https://...", "gemini_name": "files/abc",
//!   "file_state": "ACTIVE", "display_name": "faq.pdf" }
//!
//! { "success": false, "code": "upload_failed", "message": "upload failed: HTTP 500 - <excerpt>",
//!   "details": "<vendor body>" }
//! ```
//!
//! Status codes: 400 (missing `fileId`), 404 (record or blob missing), 409
//! (identical content is being uploaded by another request), 502 (vendor
//! failures), 500 (anything else).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser admin UI
//! can call the server directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use doc_cache_core::{FileState, ReconcileError};

use crate::config::Config;
use crate::db;
use crate::events::ReconcileObserver;
use crate::reconcile::{ReconcileReport, Reconciler};

#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler>,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config, events: Arc<dyn ReconcileObserver>) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let reconciler = Reconciler::from_config(config, pool, events)?;

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("doc-cache listening on http://{}", bind_addr);

    axum::serve(listener, router(Arc::new(reconciler))).await?;

    Ok(())
}

/// Routes, CORS included. Exposed for tests that serve it on an ephemeral port.
pub fn router(reconciler: Arc<Reconciler>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload-gemini-files", post(handle_upload))
        .route("/files/active", get(handle_active_files))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { reconciler })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        details: None,
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        AppError {
            status: StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: err.code().to_string(),
            message: err.to_string(),
            details: err.details().map(str::to_string),
        }
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
        details: None,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /upload-gemini-files ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    message: String,
    outcome: String,
    gemini_uri: String,
    gemini_name: String,
    file_state: FileState,
    display_name: String,
}

impl From<ReconcileReport> for UploadResponse {
    fn from(report: ReconcileReport) -> Self {
        UploadResponse {
            success: true,
            message: report.outcome.message().to_string(),
            outcome: report.outcome.as_str().to_string(),
            file_state: report.file_state(),
            gemini_uri: report.remote.uri,
            gemini_name: report.remote.name,
            display_name: report.display_name,
        }
    }
}

/// Reconcile the record named by `fileId`.
async fn handle_upload(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;

    let file_id = body
        .get("fileId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| bad_request("fileId is required"))?;

    let report = state.reconciler.reconcile(file_id).await?;

    Ok(Json(report.into()))
}

// ============ GET /files/active ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
    mime_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FilePart {
    file_data: FileData,
    display_name: String,
}

/// ACTIVE records shaped as the vendor's `fileData` prompt parts.
async fn handle_active_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<FilePart>>, AppError> {
    let records = state
        .reconciler
        .store()
        .list_records(Some(FileState::Active))
        .await
        .map_err(internal)?;

    let parts = records
        .into_iter()
        .filter_map(|r| {
            let remote = r.remote()?;
            Some(FilePart {
                file_data: FileData {
                    file_uri: remote.uri,
                    mime_type: r.mime_type,
                },
                display_name: r.display_name,
            })
        })
        .collect();

    Ok(Json(parts))
}
