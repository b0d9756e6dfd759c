//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub input_queue: Option<String>,
    pub receive_steps: Vec<&'static str>,
}

/// GET /health: reports the bus endpoint and its receive pipeline.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        input_queue: state.bus.address().map(str::to_string),
        receive_steps: state.bus.dispatcher().step_names(),
    })
}
