//! HTTP API for the timelapse daemon
//!
//! Thin axum layer over the orchestrator: submit, query, list, download and
//! system info. All job state is read from the registry.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{Orchestrator, SubmitError};
use crate::registry::{JobRecord, JobStatus};
use crate::request::{OutputFormat, TimelapseRequest};
use crate::system_info::{collect_system_info, SystemInfo};

/// Errors that can occur when running the API server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Client-facing error, rendered as `{"detail": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("Job not found")]
    JobNotFound,

    #[error("Timelapse not ready for download")]
    NotReady,

    #[error("Output file not found")]
    OutputMissing,

    #[error("Failed to read output file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Validation(errors) => ApiError::Validation(errors),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Validation(errors) => (StatusCode::BAD_REQUEST, json!({ "errors": errors })),
            ApiError::JobNotFound => (StatusCode::NOT_FOUND, json!(self.to_string())),
            ApiError::NotReady => (StatusCode::BAD_REQUEST, json!(self.to_string())),
            ApiError::OutputMissing => (StatusCode::NOT_FOUND, json!(self.to_string())),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, json!(self.to_string())),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Handler for POST /api/timelapse
async fn create_job(
    State(orchestrator): State<Orchestrator>,
    Json(request): Json<TimelapseRequest>,
) -> Result<Json<JobRecord>, ApiError> {
    let record = orchestrator.submit(&request).await?;
    Ok(Json(record))
}

/// Handler for GET /api/job/:job_id
async fn get_job(
    State(orchestrator): State<Orchestrator>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    orchestrator
        .registry()
        .get(&job_id)
        .map(Json)
        .map_err(|_| ApiError::JobNotFound)
}

/// Handler for GET /api/jobs
async fn list_jobs(State(orchestrator): State<Orchestrator>) -> Json<Vec<JobRecord>> {
    Json(orchestrator.registry().list())
}

/// Handler for GET /api/download/:job_id
///
/// Streams the output file of a completed job.
async fn download(
    State(orchestrator): State<Orchestrator>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let record = orchestrator
        .registry()
        .get(&job_id)
        .map_err(|_| ApiError::JobNotFound)?;

    let output_path = match (record.status, record.output_path) {
        (JobStatus::Completed, Some(path)) => path,
        _ => return Err(ApiError::NotReady),
    };

    let file = match tokio::fs::File::open(&output_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::OutputMissing)
        }
        Err(e) => return Err(ApiError::Io(e)),
    };

    let content_type = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse::<OutputFormat>().ok())
        .map(|format| format.mime_type())
        .unwrap_or("application/octet-stream");
    let filename = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Handler for GET /api/system/info
async fn system_info(State(orchestrator): State<Orchestrator>) -> Json<SystemInfo> {
    let limits = *orchestrator.limits().read().await;
    Json(collect_system_info(limits))
}

/// Creates the axum Router with all API endpoints
pub fn create_router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/api/timelapse", post(create_job))
        .route("/api/job/:job_id", get(get_job))
        .route("/api/jobs", get(list_jobs))
        .route("/api/download/:job_id", get(download))
        .route("/api/system/info", get(system_info))
        .with_state(orchestrator)
}

/// Runs the API server on `addr` until `shutdown` fires
pub async fn run_server(
    orchestrator: Orchestrator,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let app = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
