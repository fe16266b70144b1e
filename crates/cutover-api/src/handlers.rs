//! REST API handlers.
//!
//! Each handler calls into the `CutoverController` and returns JSON in the
//! `{success, data, error}` envelope. Error statuses follow the error kind:
//! validation 400, not found 404, conflict or terminal 409, anything else 500.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use cutover_core::HealthSignal;
use cutover_rollout::{CutoverError, ErrorKind, NewDeployment, NewFleet, RegistryError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::Terminal => StatusCode::CONFLICT,
        ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn cutover_error(e: &CutoverError) -> Response {
    debug!(error = %e, kind = ?e.kind(), "request failed");
    error_response(&e.to_string(), status_for(e.kind())).into_response()
}

/// Like `cutover_error`, but an unknown fleet in the path is a 404.
fn fleet_error(e: &CutoverError) -> Response {
    match e {
        CutoverError::Registry(RegistryError::FleetNotFound(_)) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        _ => cutover_error(e),
    }
}

// ── Fleets ─────────────────────────────────────────────────────

/// GET /api/v1/fleets
pub async fn list_fleets(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.registry().list())
}

/// POST /api/v1/fleets
pub async fn register_fleet(
    State(state): State<ApiState>,
    Json(req): Json<NewFleet>,
) -> impl IntoResponse {
    match state.controller.register_fleet(req) {
        Ok(fleet) => (StatusCode::CREATED, ApiResponse::ok(fleet)).into_response(),
        Err(e) => cutover_error(&e),
    }
}

/// GET /api/v1/fleets/{id}
pub async fn get_fleet(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.controller.registry().get(&id) {
        Ok(fleet) => ApiResponse::ok(fleet).into_response(),
        Err(e) => fleet_error(&CutoverError::from(e)),
    }
}

/// DELETE /api/v1/fleets/{id}
pub async fn retire_fleet(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.retire_fleet(&id).await {
        Ok(fleet) => ApiResponse::ok(fleet).into_response(),
        Err(e) => fleet_error(&e),
    }
}

// ── Deployments ────────────────────────────────────────────────

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.list() {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => cutover_error(&e),
    }
}

/// POST /api/v1/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    Json(req): Json<NewDeployment>,
) -> impl IntoResponse {
    match state.controller.create(req).await {
        Ok(deployment) => (StatusCode::CREATED, ApiResponse::ok(deployment)).into_response(),
        Err(e) => cutover_error(&e),
    }
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.get(&id) {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(e) => cutover_error(&e),
    }
}

/// POST /api/v1/deployments/{id}/start
pub async fn start_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.start(&id).await {
        Ok(deployment) => (StatusCode::ACCEPTED, ApiResponse::ok(deployment)).into_response(),
        Err(e) => cutover_error(&e),
    }
}

/// Abort request body. The body itself is optional.
#[derive(Debug, Default, serde::Deserialize)]
pub struct AbortRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/v1/deployments/{id}/abort
pub async fn abort_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<AbortRequest>>,
) -> impl IntoResponse {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "requested via API".to_string());
    match state.controller.abort(&id, &reason).await {
        Ok(deployment) => (StatusCode::ACCEPTED, ApiResponse::ok(deployment)).into_response(),
        Err(e) => cutover_error(&e),
    }
}

/// GET /api/v1/deployments/{id}/events
pub async fn deployment_events(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.events(&id) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => cutover_error(&e),
    }
}

// ── Signals & audit ────────────────────────────────────────────

/// POST /api/v1/signals
pub async fn push_signal(
    State(state): State<ApiState>,
    Json(signal): Json<HealthSignal>,
) -> impl IntoResponse {
    match state.controller.record_signal(signal.clone()).await {
        Ok(()) => (StatusCode::ACCEPTED, ApiResponse::ok(signal)).into_response(),
        Err(e) => cutover_error(&e),
    }
}

/// GET /api/v1/events
pub async fn list_events(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.all_events() {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => cutover_error(&e),
    }
}
