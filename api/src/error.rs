use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use toolbridge_core::error::{self, ApiError, BridgeError};

/// Internal error type that converts to structured API responses
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or rejected credential (401)
    #[error("unauthorized: {message}")]
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Unknown route or dev segment (404)
    #[error("not found")]
    NotFound,
    /// Backend failure surfaced to an operator endpoint (502)
    #[error(transparent)]
    Upstream(BridgeError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: "Not found".to_string(),
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Upstream(err) => {
                tracing::warn!(event = "upstream_error", error = %err, request_id = %request_id);
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: err.code().to_string(),
                        message: err.to_string(),
                        request_id,
                        docs_hint: Some(
                            "The backend catalog could not be loaded; the previous tool set is still served."
                                .to_string(),
                        ),
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        AppError::Upstream(err)
    }
}
