use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use mcrelay_connection::{AgentConnection, ConnectionStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::OpenApi;

use crate::models::*;
use crate::{ApiDoc, AppState};

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

/// Look up the wrapper named by `?wrapper=`
pub(crate) fn resolve_wrapper(
    state: &AppState,
    query: &WrapperQuery,
) -> Result<Arc<AgentConnection>, ApiError> {
    let id = query
        .wrapper
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Wrapper ID required", "MISSING_WRAPPER")),
            )
        })?;

    state.registry.get(id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                format!("Wrapper '{}' not found", id),
                "WRAPPER_NOT_FOUND",
            )),
        )
    })
}

/// List all configured wrappers
#[utoipa::path(
    get,
    path = "/api/wrappers",
    responses(
        (status = 200, description = "All wrappers with status and statistics", body = [Wrapper]),
        (status = 401, description = "Missing or invalid key", body = ErrorResponse)
    ),
    tag = "wrappers"
)]
pub async fn list_wrappers(State(state): State<Arc<AppState>>) -> Json<Vec<Wrapper>> {
    debug!("Listing wrappers");

    let wrappers = state
        .registry
        .list()
        .iter()
        .map(|connection| Wrapper::from(connection.as_ref()))
        .collect();

    Json(wrappers)
}

/// Reconnect a wrapper now, with a fresh backoff sequence
#[utoipa::path(
    post,
    path = "/api/retry",
    params(
        ("wrapper" = String, Query, description = "Wrapper ID")
    ),
    responses(
        (status = 200, description = "Retry accepted", body = RetryResponse),
        (status = 400, description = "Missing wrapper ID", body = ErrorResponse),
        (status = 404, description = "Unknown wrapper", body = ErrorResponse),
        (status = 500, description = "Retry not allowed in the current state", body = ErrorResponse)
    ),
    tag = "wrappers"
)]
pub async fn retry_wrapper(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WrapperQuery>,
) -> Result<Json<RetryResponse>, ApiError> {
    let connection = resolve_wrapper(&state, &query)?;

    connection.retry().map_err(|e| {
        warn!(agent_id = %connection.id(), "Retry rejected: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string(), "RETRY_REJECTED")),
        )
    })?;

    info!(agent_id = %connection.id(), "Retry accepted");

    Ok(Json(RetryResponse {
        id: connection.id().to_string(),
        status: connection.status().into(),
    }))
}

/// Query the game server behind a wrapper
#[utoipa::path(
    get,
    path = "/api/serverstatus",
    params(
        ("wrapper" = String, Query, description = "Wrapper ID")
    ),
    responses(
        (status = 200, description = "Game server status", body = ServerStatusResponse),
        (status = 400, description = "Missing wrapper ID", body = ErrorResponse),
        (status = 404, description = "Unknown wrapper", body = ErrorResponse),
        (status = 500, description = "Status probe failed", body = ErrorResponse)
    ),
    tag = "wrappers"
)]
pub async fn server_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WrapperQuery>,
) -> Result<Json<ServerStatusResponse>, ApiError> {
    let connection = resolve_wrapper(&state, &query)?;

    let probe_error = |message: String| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(message, "STATUS_UNAVAILABLE")),
        )
    };

    let target = connection
        .descriptor()
        .status_target(state.default_status_port)
        .map_err(|e| probe_error(e.to_string()))?;

    debug!(agent_id = %connection.id(), %target, "Probing game server");

    let status = state.probe.probe(&target).await.map_err(|e| {
        warn!(agent_id = %connection.id(), "Status probe failed: {}", e);
        probe_error(e.to_string())
    })?;

    Ok(Json(status.into()))
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let wrappers = state.registry.list();
    let connected = wrappers
        .iter()
        .filter(|c| c.status() == ConnectionStatus::Connected)
        .count();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        wrappers: wrappers.len(),
        connected,
    })
}

/// OpenAPI document for this API
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
