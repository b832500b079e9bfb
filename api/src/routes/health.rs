use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tools: usize,
    pub build: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check. `degraded` until the first catalog load succeeds; the
/// service still answers with the version tool in that state.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let current = state.bridge.registry().current().await;
    let loaded = current.snapshot.refreshed_at.is_some();

    Json(HealthResponse {
        status: if loaded { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tools: current.tools.len(),
        build: current.snapshot.catalog.build.clone(),
        refreshed_at: current.snapshot.refreshed_at,
    })
}
