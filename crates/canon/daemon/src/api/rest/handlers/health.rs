//! Health and readiness handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub ts: DateTime<Utc>,
}

/// Liveness: the process is up.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        ts: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub ts: DateTime<Utc>,
}

/// Readiness: every backing store answers a round trip.
pub async fn readiness(State(state): State<AppState>) -> ApiResult<Json<ReadinessResponse>> {
    state.service.ready().await?;
    Ok(Json(ReadinessResponse {
        status: "ready".to_string(),
        ts: Utc::now(),
    }))
}
