//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::info;

use crate::deploy::fsm::RunState;
use crate::errors::DeployError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "nuggetd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Current run state
pub async fn state_handler(State(state): State<Arc<ServerState>>) -> Json<RunState> {
    Json(state.current_state())
}

/// Ready response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub accepted: bool,
    pub message: String,
}

/// Human confirmation that the prompted device is plugged in
pub async fn ready_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let (status, message) = match state.release_gate() {
        Ok(()) => {
            info!("Ready signal received over HTTP");
            (StatusCode::ACCEPTED, "ready".to_string())
        }
        Err(e @ (DeployError::GateAlreadySignaled | DeployError::GateNotOpen)) => {
            (StatusCode::CONFLICT, e.to_string())
        }
        Err(e @ DeployError::GateClosed) => (StatusCode::GONE, e.to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    (
        status,
        Json(ReadyResponse {
            accepted: status == StatusCode::ACCEPTED,
            message,
        }),
    )
}
