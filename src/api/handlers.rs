/// Request handlers for the HTTP surface
use crate::actions::{ActionHandler, ActionRequest};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use conclave_dispatch::Orchestrator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub actions: ActionHandler,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            actions: ActionHandler::new(orchestrator),
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub workers: usize,
    pub tasks_in_flight: usize,
}

/// Liveness plus a few registry counters
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.actions.orchestrator();
    let status = if orchestrator.is_shut_down() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        workers: orchestrator.registry().len(),
        tasks_in_flight: orchestrator.state().tracker.in_flight(),
    })
}

/// Single action endpoint; failures answer 500 with the error envelope
pub async fn handle_action(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> impl IntoResponse {
    let response = state.actions.handle(request).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(response))
}
