//! Web API Server
//!
//! HTTP surface over the [`Coordinator`]. Compiled with the `web-api` feature.
//!
//! ## Endpoints
//!
//! - `POST /api/v1/tasks` — Submit a task
//! - `GET  /api/v1/tasks/:id` — Task snapshot
//! - `POST /api/v1/tasks/:id/cancel` — Cancel a pending/assigned task
//! - `GET  /api/v1/status` — Fleet, task counts, queue size
//! - `POST /api/v1/route` — Route a request profile
//! - `GET  /api/v1/routing/stats` — Routing configuration and endpoint health
//! - `GET  /health` — Liveness
//! - `GET  /metrics` — Prometheus metrics

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::dispatch::{Coordinator, CoordinatorStatus, Priority, TaskSnapshot, TaskStatus};
use crate::routing::{OperatingMode, RequestProfile, RouteDecision, RoutingStats};
use crate::DispatchError;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Body of `POST /api/v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    /// Task type tag.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Priority; defaults to `normal`.
    #[serde(default)]
    pub priority: Priority,
}

/// Response of `POST /api/v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    /// Generated task id.
    pub task_id: String,
    /// Always `pending` at submission.
    pub status: TaskStatus,
}

/// Response of `POST /api/v1/tasks/:id/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Task id.
    pub task_id: String,
    /// Whether the cancel took effect.
    pub cancelled: bool,
    /// Status after the request.
    pub status: TaskStatus,
}

/// Body of `POST /api/v1/route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Request profile.
    #[serde(flatten)]
    pub profile: RequestProfile,
    /// Operating mode; defaults to `connected`.
    #[serde(default)]
    pub operating_mode: OperatingMode,
}

// ============================================================================
// Server
// ============================================================================

/// Build the API router over `coordinator`.
pub fn router(coordinator: Arc<Coordinator>, max_request_size: usize) -> Router {
    Router::new()
        .route("/api/v1/tasks", post(submit_handler))
        .route("/api/v1/tasks/:id", get(task_handler))
        .route("/api/v1/tasks/:id/cancel", post(cancel_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/route", post(route_handler))
        .route("/api/v1/routing/stats", get(routing_stats_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn_with_state(
            max_request_size,
            body_size_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

/// Serve the API until `shutdown` resolves.
///
/// # Errors
///
/// Returns [`DispatchError::Other`] if the address cannot be bound or the
/// server fails.
pub async fn start_server(
    config: ServerConfig,
    coordinator: Arc<Coordinator>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DispatchError> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = router(coordinator, config.max_request_size);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DispatchError::Other(format!("bind {addr}: {e}")))?;
    info!("Web API ready on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| DispatchError::Other(format!("web API server: {e}")))?;

    info!("Web API stopped");
    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

/// Echoes the client's `X-Request-ID`, or assigns a fresh UUID v4.
async fn request_id_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Rejects bodies whose declared `Content-Length` exceeds `max_size` with 413.
async fn body_size_middleware(
    State(max_size): State<usize>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok());

    match declared {
        Some(len) if len > max_size => (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(serde_json::json!({"error": "Request body too large"})),
        )
            .into_response(),
        _ => next.run(req).await,
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn submit_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), AppError> {
    if req.task_type.trim().is_empty() {
        return Err(AppError::BadRequest("task type must not be empty"));
    }
    let task_id = coordinator.submit_task(req.task_type, req.payload, req.priority);
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id,
            status: TaskStatus::Pending,
        }),
    ))
}

async fn task_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<TaskSnapshot>, AppError> {
    coordinator
        .get_task_status(&id)
        .map(Json)
        .ok_or(AppError::NotFound)
}

async fn cancel_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = coordinator.cancel_task(&id);
    let status = coordinator
        .get_task_status(&id)
        .map(|t| t.status)
        .ok_or(AppError::NotFound)?;
    Ok(Json(CancelResponse {
        task_id: id,
        cancelled,
        status,
    }))
}

async fn status_handler(State(coordinator): State<Arc<Coordinator>>) -> Json<CoordinatorStatus> {
    Json(coordinator.get_coordinator_status())
}

async fn route_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RouteRequest>,
) -> Json<RouteDecision> {
    Json(
        coordinator
            .route_request(&req.profile, req.operating_mode)
            .await,
    )
}

async fn routing_stats_handler(State(coordinator): State<Arc<Coordinator>>) -> Json<RoutingStats> {
    Json(coordinator.get_routing_stats())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

// ============================================================================
// Error Type
// ============================================================================

/// Handler errors, each mapped to a status code and a JSON body.
#[derive(Debug)]
enum AppError {
    /// Unknown task id.
    NotFound,
    /// Well-formed JSON with an unacceptable value.
    BadRequest(&'static str),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Task not found"),
            AppError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}
