use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
    pub backend: &'static str,
}

/// Axum handler for `GET /api/health`. Liveness only; storage is not checked.
pub async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        timestamp: Utc::now(),
        environment: state.environment.clone(),
        backend: state.backend,
    })
}
