use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

pub const CORS_ORIGINS_ENV: &str = "TOOLBRIDGE_CORS_ORIGINS";

const CONNECTOR_ORIGINS: &[&str] = &["https://claude.ai", "https://chatgpt.com"];

/// Build a CORS layer from `TOOLBRIDGE_CORS_ORIGINS`.
///
/// - Origins: comma-separated list (default: `http://localhost:3000`), plus
///   the hosted agent connectors
/// - Methods: GET, POST, OPTIONS
/// - Headers: Authorization, Content-Type, Mcp-Session-Id
/// - Credentials: allowed (session cookie)
pub fn build_cors_layer() -> CorsLayer {
    let origins_str =
        std::env::var(CORS_ORIGINS_ENV).unwrap_or_else(|_| "http://localhost:3000".to_string());
    cors_layer_for(&origins_str)
}

fn allowed_origins(raw: &str) -> Vec<HeaderValue> {
    let mut origin_values: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect();

    for connector_origin in CONNECTOR_ORIGINS {
        if !origin_values
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(connector_origin))
        {
            origin_values.push((*connector_origin).to_string());
        }
    }

    origin_values
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

fn cors_layer_for(raw: &str) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allowed_origins(raw))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("mcp-session-id"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_origins_are_always_allowed_once() {
        let origins = allowed_origins(" https://app.example.com ,, https://claude.ai");
        assert_eq!(
            origins,
            vec![
                HeaderValue::from_static("https://app.example.com"),
                HeaderValue::from_static("https://claude.ai"),
                HeaderValue::from_static("https://chatgpt.com"),
            ]
        );
    }
}
