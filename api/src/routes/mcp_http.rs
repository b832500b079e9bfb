use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::auth::{
    AuthenticatedIdentity, CredentialSource, PROTECTED_RESOURCE_PATH, RequireAuthLayer,
    request_base_url,
};
use crate::error::AppError;
use crate::state::AppState;

const MCP_PATH: &str = "/mcp";

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            MCP_PATH,
            post(mcp_post)
                .route_layer(RequireAuthLayer::new(state.auth.clone()))
                .get(mcp_get),
        )
        .route("/mcp/dev/{segment}", post(mcp_dev_post))
        .route(
            PROTECTED_RESOURCE_PATH,
            get(oauth_protected_resource_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(oauth_protected_resource_metadata),
        )
}

async fn mcp_get() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn mcp_post(
    State(state): State<AppState>,
    identity: AuthenticatedIdentity,
    body: Bytes,
) -> Response {
    handle_jsonrpc_body(&state, identity, &body).await
}

/// Development-only endpoint: the path segment is an encrypted subject.
/// Every failure, including dev mode being off, is a plain 404.
async fn mcp_dev_post(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let cipher = state.dev_endpoint.as_ref().ok_or(AppError::NotFound)?;
    let subject = cipher.decrypt_segment(&segment).ok_or_else(|| {
        tracing::info!(event = "dev_endpoint_rejected", "dev endpoint segment did not decrypt");
        AppError::NotFound
    })?;

    let identity = AuthenticatedIdentity {
        subject,
        source: CredentialSource::DevEndpoint,
    };
    Ok(handle_jsonrpc_body(&state, identity, &body).await)
}

async fn handle_jsonrpc_body(state: &AppState, identity: AuthenticatedIdentity, body: &[u8]) -> Response {
    let incoming: Value = match serde_json::from_slice(body) {
        Ok(incoming) => incoming,
        Err(err) => return Json(toolbridge_mcp_runtime::parse_error_response(err)).into_response(),
    };

    tracing::debug!(
        event = "mcp_http_request",
        source = identity.source.as_str(),
        batch = incoming.is_array(),
        "MCP request accepted"
    );

    let mut replies =
        toolbridge_mcp_runtime::handle_http_jsonrpc(&state.bridge, Some(identity.subject), incoming)
            .await;

    match replies.len() {
        // notifications only
        0 => StatusCode::ACCEPTED.into_response(),
        1 => Json(replies.remove(0)).into_response(),
        _ => Json(Value::Array(replies)).into_response(),
    }
}

async fn oauth_protected_resource_metadata(
    headers: HeaderMap,
    original_uri: OriginalUri,
) -> Json<Value> {
    let base = request_base_url(&headers);
    tracing::info!(
        event = "mcp_oauth_discovery_request",
        path = %original_uri.0.path(),
        base_url = %base,
        "protected resource metadata served"
    );
    Json(json!({
        "resource": format!("{base}{MCP_PATH}"),
        "bearer_methods_supported": ["header"],
        "resource_name": "toolbridge",
    }))
}
