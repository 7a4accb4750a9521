//! Agent status API.
//!
//! Exposes:
//! - `GET /health`
//! - `GET /api/workers` - controllers with their workers and activity
//! - `POST /api/workers/:worker_id/start` / `POST /api/workers/:worker_id/stop`
//! - `GET /api/entities` - ids of tracked entities
//! - `GET /api/entities/:entity_id` - last accepted state of one entity

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hubsync::tracker::TrackedState;
use hubsync::Tracker;
use serde::Serialize;
use tracing::info;

use crate::controller::ControllerError;
use crate::manager::{ControllerStatus, WorkerManager};

/// Shared state for the status API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<WorkerManager>,
    pub tracker: Arc<Tracker>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct WorkerActionResponse {
    worker_id: String,
    active: bool,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_workers(State(state): State<Arc<ApiState>>) -> Json<Vec<ControllerStatus>> {
    Json(state.manager.status().await)
}

async fn start_worker(
    State(state): State<Arc<ApiState>>,
    Path(worker_id): Path<String>,
) -> Result<Json<WorkerActionResponse>, AppError> {
    state.manager.start_worker(&worker_id).await?;
    info!(worker = %worker_id, "Worker started via API");
    Ok(Json(WorkerActionResponse {
        worker_id,
        active: true,
    }))
}

async fn stop_worker(
    State(state): State<Arc<ApiState>>,
    Path(worker_id): Path<String>,
) -> Result<Json<WorkerActionResponse>, AppError> {
    state.manager.stop_worker(&worker_id).await?;
    info!(worker = %worker_id, "Worker stopped via API");
    Ok(Json(WorkerActionResponse {
        worker_id,
        active: false,
    }))
}

async fn list_entities(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    Json(state.tracker.list())
}

async fn get_entity(
    State(state): State<Arc<ApiState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<TrackedState>, AppError> {
    state
        .tracker
        .get(&entity_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("entity not tracked: {}", entity_id)))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

enum AppError {
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<ControllerError> for AppError {
    fn from(e: ControllerError) -> Self {
        match e {
            ControllerError::UnknownWorker(_) => AppError::NotFound(e.to_string()),
            ControllerError::WorkerAlreadyStarted(_) | ControllerError::WorkerDisabled(_) => {
                AppError::Conflict(e.to_string())
            }
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: msg })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/workers", get(list_workers))
        .route("/api/workers/:worker_id/start", post(start_worker))
        .route("/api/workers/:worker_id/stop", post(stop_worker))
        .route("/api/entities", get(list_entities))
        .route("/api/entities/:entity_id", get(get_entity))
        .with_state(Arc::new(state))
}
