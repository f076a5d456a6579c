//! Health Check Endpoints
//!
//! Liveness, readiness and version handlers.

use super::state::AppState;
use crate::version;
use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::atomic::Ordering;

/// Liveness probe endpoint.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe endpoint. Returns OK once the broker topology is declared.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub build: String,
}

/// GET /version - Build version details
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: version::full_version(),
        build: version::build_info(),
    })
}
