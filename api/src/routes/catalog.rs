use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use toolbridge_mcp_runtime::RefreshSummary;
use toolbridge_mcp_runtime::registry::CatalogSnapshot;

use crate::auth::{AuthenticatedIdentity, RequireAuthLayer};
use crate::error::AppError;
use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/catalog", get(get_catalog))
        .route("/admin/refresh", post(refresh_catalog))
        .route_layer(RequireAuthLayer::new(state.auth.clone()))
}

/// Last validated catalog, consistent with the tools currently served.
async fn get_catalog(State(state): State<AppState>) -> Json<CatalogSnapshot> {
    Json(state.bridge.registry().snapshot().await)
}

async fn refresh_catalog(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
) -> Result<Json<RefreshSummary>, AppError> {
    tracing::info!(
        event = "manual_refresh_requested",
        subject = %identity.subject,
        "manual catalog refresh"
    );
    let summary = state.bridge.refresh().await?;
    Ok(Json(summary))
}
