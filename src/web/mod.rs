//! HTTP print API.
//!
//! The boundary where the rest of the application hands photos to the print pipeline.
//! Photo ids are resolved to files under the configured photo directory.
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness probe
//! - `POST /print` - Print a list of photos, returns a batch report
//! - `GET /jobs` - Jobs recorded in the local ledger
//! - `GET /jobs/{id}` - Current provider status of a job
//! - `DELETE /jobs/{id}` - Cancel a job
//!
//! Both job routes take an optional `?device_id=` for jobs printed on a device other
//! than the configured one.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::context::AppContext;
use crate::core::{BatchReport, LedgerEntry, PhotoUpload, PrintError, PrintJob, PrintOptions, PrintService};
use crate::db;

const DEFAULT_LIST_LIMIT: u32 = 50;

/// Shared state for the web server
#[derive(Clone)]
pub struct WebState {
    pub printer: Arc<PrintService>,
    pub photo_dir: Arc<PathBuf>,
}

/// Web server for the print API.
pub struct WebServer {
    bind_addr: SocketAddr,
    state: WebState,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    /// Create a new web server bound to the configured address.
    pub fn new(ctx: &AppContext) -> Self {
        let state = WebState {
            printer: ctx.printer.clone(),
            photo_dir: Arc::new(ctx.config.photo_dir.clone()),
        };
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            bind_addr: ctx.config.http_bind,
            state,
            shutdown_tx,
        }
    }

    /// Start the web server. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "Print API listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/print", post(print_photos))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(job_status).delete(cancel_job))
        .with_state(state)
}

/// Error body returned by every route.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<PrintError> for ApiError {
    fn from(err: PrintError) -> Self {
        let status = match &err {
            PrintError::NoDevice => StatusCode::SERVICE_UNAVAILABLE,
            PrintError::InvalidId(_) => StatusCode::BAD_REQUEST,
            PrintError::Rejected { .. }
            | PrintError::Transport { .. }
            | PrintError::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
            PrintError::Config(_) | PrintError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
    }
}

#[derive(Debug, Deserialize)]
pub struct PrintRequest {
    pub photo_ids: Vec<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub settings: PrintOptions,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DeviceParams {
    device_id: Option<String>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Map a photo id to a file directly inside the photo directory.
fn photo_path(photo_dir: &std::path::Path, id: &str) -> Result<PathBuf, ApiError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("invalid photo id '{}'", id),
        ));
    }
    Ok(photo_dir.join(id))
}

async fn load_photo(photo_dir: &std::path::Path, id: &str) -> Result<PhotoUpload, ApiError> {
    let path = photo_path(photo_dir, id)?;
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(PhotoUpload {
            data,
            file_name: id.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("photo '{}' not found", id),
        )),
        Err(e) => Err(PrintError::from(e).into()),
    }
}

async fn print_photos(
    State(state): State<WebState>,
    Json(request): Json<PrintRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    if request.photo_ids.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "no photos to print"));
    }

    let device_id = state.printer.resolve_device(request.device_id.as_deref())?;

    let mut photos = Vec::with_capacity(request.photo_ids.len());
    for id in &request.photo_ids {
        photos.push(load_photo(&state.photo_dir, id).await?);
    }

    let report = state
        .printer
        .print_multiple_photos(&device_id, &photos, &request.settings)
        .await;
    Ok(Json(report))
}

async fn job_status(
    State(state): State<WebState>,
    Path(job_id): Path<String>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<PrintJob>, ApiError> {
    let device_id = state.printer.resolve_device(params.device_id.as_deref())?;
    let job = state
        .printer
        .check_print_job_status_on(&device_id, &job_id)
        .await?;
    Ok(Json(job))
}

async fn cancel_job(
    State(state): State<WebState>,
    Path(job_id): Path<String>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<Value>, ApiError> {
    let device_id = state.printer.resolve_device(params.device_id.as_deref())?;
    let cancelled = state
        .printer
        .cancel_print_job_on(&device_id, &job_id)
        .await?;
    Ok(Json(json!({ "job_id": job_id, "cancelled": cancelled })))
}

async fn list_jobs(
    State(state): State<WebState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let Some(conn) = state.printer.ledger() else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "job ledger is not enabled",
        ));
    };
    let entries = db::jobs::list(conn, params.limit.unwrap_or(DEFAULT_LIST_LIMIT)).await?;
    Ok(Json(entries))
}
