use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy shared by the catalog pipeline, the dispatcher and the
/// credential checks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Required key material or settings are missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network failure or timeout talking to the backend.
    #[error("backend unavailable: {0}")]
    UpstreamUnavailable(String),
    /// Backend response exceeded the configured byte cap.
    #[error("response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
    /// Malformed catalog or version document.
    #[error("parse error: {0}")]
    Parse(String),
    /// A single catalog entry failed validation and was excluded.
    #[error("invalid catalog entry '{entry}': {reason}")]
    Validation { entry: String, reason: String },
    /// A tool invocation could not be carried out.
    #[error("{0}")]
    Dispatch(String),
    /// Credential rejected. Detail is for logs only.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl BridgeError {
    /// Machine-readable code used in tool errors and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Configuration(_) => codes::CONFIGURATION_ERROR,
            BridgeError::UpstreamUnavailable(_) => codes::UPSTREAM_UNAVAILABLE,
            BridgeError::ResponseTooLarge { .. } => codes::RESPONSE_TOO_LARGE,
            BridgeError::Parse(_) => codes::PARSE_ERROR,
            BridgeError::Validation { .. } => codes::VALIDATION_FAILED,
            BridgeError::Dispatch(_) => codes::DISPATCH_ERROR,
            BridgeError::Auth(_) => codes::UNAUTHORIZED,
        }
    }
}

/// Structured error response body. Every error carries enough information
/// for an agent to understand what went wrong.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "unauthorized")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the service
pub mod codes {
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
    pub const UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
    pub const RESPONSE_TOO_LARGE: &str = "response_too_large";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const DISPATCH_ERROR: &str = "dispatch_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNAUTHORIZED: &str = "unauthorized";
}
