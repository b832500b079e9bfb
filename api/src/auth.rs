use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::extract::{FromRequestParts, Request};
use axum::http::header::{AUTHORIZATION, COOKIE, HOST, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde_json::json;
use tower::{Layer, Service, ServiceExt};
use toolbridge_core::auth::{TokenClaims, TokenVerifier, token_fingerprint};
use toolbridge_core::error::BridgeError;

use crate::error::AppError;

pub const DEFAULT_SESSION_COOKIE: &str = "toolbridge_session";
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Subject resolved for one in-flight request. Lives in request extensions
/// only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub subject: String,
    pub source: CredentialSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Bearer,
    SessionCookie,
    LegacyCookie,
    DevEndpoint,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialSource::Bearer => "bearer",
            CredentialSource::SessionCookie => "session_cookie",
            CredentialSource::LegacyCookie => "legacy_cookie",
            CredentialSource::DevEndpoint => "dev_endpoint",
        }
    }
}

/// Why a request was turned away. The description is the only detail that
/// reaches the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    pub description: &'static str,
    pub cause: Option<BridgeError>,
}

#[derive(Debug, Clone)]
pub struct AuthGateway {
    verifier: TokenVerifier,
    cookie_name: String,
}

impl AuthGateway {
    pub fn new(secret: Option<&str>, cookie_name: impl Into<String>) -> Self {
        Self {
            verifier: TokenVerifier::new(secret),
            cookie_name: cookie_name.into(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.verifier.is_open()
    }

    /// Bearer header first, then the session cookie. In open mode the cookie
    /// may also carry a legacy unsigned token.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedIdentity, AuthRejection> {
        let mut last_error = None;

        if let Some(token) = bearer_token(headers) {
            match self.verifier.verify(&token, now) {
                Ok(claims) => return Ok(identity(claims, CredentialSource::Bearer)),
                Err(err) => {
                    log_rejected(&token, CredentialSource::Bearer, &err);
                    last_error = Some(err);
                }
            }
        }

        if let Some(token) = cookie_value(headers, &self.cookie_name) {
            match self.verifier.verify(&token, now) {
                Ok(claims) => return Ok(identity(claims, CredentialSource::SessionCookie)),
                Err(err) if self.verifier.is_open() => {
                    match self.verifier.extract_unverified_subject(&token, now) {
                        Ok(claims) => {
                            return Ok(identity(claims, CredentialSource::LegacyCookie));
                        }
                        Err(_) => {
                            log_rejected(&token, CredentialSource::SessionCookie, &err);
                            last_error = Some(err);
                        }
                    }
                }
                Err(err) => {
                    log_rejected(&token, CredentialSource::SessionCookie, &err);
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(cause) => AuthRejection {
                description: "Invalid or expired credential",
                cause: Some(cause),
            },
            None => AuthRejection {
                description: "Missing access token",
                cause: None,
            },
        })
    }
}

fn identity(claims: TokenClaims, source: CredentialSource) -> AuthenticatedIdentity {
    AuthenticatedIdentity {
        subject: claims.sub,
        source,
    }
}

fn log_rejected(token: &str, source: CredentialSource, err: &BridgeError) {
    tracing::info!(
        event = "auth_credential_rejected",
        source = source.as_str(),
        fingerprint = %token_fingerprint(token),
        reason = %err,
        "credential rejected"
    );
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// `<scheme>://<host>` as the client addressed us. Scheme comes from
/// `X-Forwarded-Proto`; host has control and quote characters removed so it
/// can sit inside a quoted header parameter.
pub fn request_base_url(headers: &HeaderMap) -> String {
    let proto = first_header_token(headers, "x-forwarded-proto")
        .map(|proto| proto.to_ascii_lowercase())
        .filter(|proto| proto == "https" || proto == "http")
        .unwrap_or_else(|| "http".to_string());
    let host = first_header_token(headers, "x-forwarded-host")
        .or_else(|| {
            headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        })
        .map(|host| sanitize_host(&host))
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{proto}://{host}")
}

fn sanitize_host(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '\'' | '\\' | ' '))
        .collect()
}

fn first_header_token(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

/// 401 with a `WWW-Authenticate` challenge pointing at the protected
/// resource metadata.
pub fn unauthorized_challenge(headers: &HeaderMap, description: &str) -> Response {
    let resource_metadata = format!("{}{PROTECTED_RESOURCE_PATH}", request_base_url(headers));
    let challenge = format!("Bearer resource_metadata=\"{resource_metadata}\"");
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "unauthorized",
            "error_description": description,
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response.headers_mut().insert(WWW_AUTHENTICATE, value);
    }
    response
}

// --- Tower Layer/Service guarding protected routes ---

/// Rejects unauthenticated requests with a challenge and injects
/// `AuthenticatedIdentity` into extensions for the rest.
#[derive(Clone)]
pub struct RequireAuthLayer {
    gateway: Arc<AuthGateway>,
}

impl RequireAuthLayer {
    pub fn new(gateway: Arc<AuthGateway>) -> Self {
        Self { gateway }
    }
}

impl<S> Layer<S> for RequireAuthLayer {
    type Service = RequireAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireAuthService {
            inner,
            gateway: Arc::clone(&self.gateway),
        }
    }
}

#[derive(Clone)]
pub struct RequireAuthService<S> {
    inner: S,
    gateway: Arc<AuthGateway>,
}

impl<S> Service<Request> for RequireAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);

        // headers only; the body is not Sync
        let outcome = self.gateway.authenticate(req.headers(), Utc::now());

        Box::pin(async move {
            match outcome {
                Ok(identity) => {
                    req.extensions_mut().insert(identity);
                    Ok(ready.oneshot(req).await.into_response())
                }
                Err(rejection) => Ok(unauthorized_challenge(req.headers(), rejection.description)),
            }
        })
    }
}

// --- Extractor (used by handlers) ---

impl<S> FromRequestParts<S> for AuthenticatedIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authentication required".to_string(),
                docs_hint: Some("Send 'Authorization: Bearer <token>' or a session cookie.".to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use toolbridge_core::auth::sign_token;

    fn token(secret: &str, exp: Option<i64>) -> String {
        sign_token(
            secret,
            &TokenClaims {
                sub: "alice".to_string(),
                exp,
            },
        )
        .unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (key, value) in pairs {
            headers.append(
                axum::http::HeaderName::from_bytes(key.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn bearer_wins_over_cookie() {
        let gateway = AuthGateway::new(Some("s3cret"), DEFAULT_SESSION_COOKIE);
        let bearer = format!("Bearer {}", token("s3cret", None));
        let cookie = format!("{DEFAULT_SESSION_COOKIE}=garbage");
        let identity = gateway
            .authenticate(
                &headers(&[("authorization", &bearer), ("cookie", &cookie)]),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(identity.subject, "alice");
        assert_eq!(identity.source, CredentialSource::Bearer);
    }

    #[test]
    fn session_cookie_is_the_fallback() {
        let gateway = AuthGateway::new(Some("s3cret"), "sid");
        let cookie = format!("theme=dark; sid={}", token("s3cret", None));
        let identity = gateway
            .authenticate(
                &headers(&[("authorization", "Bearer not.a.token"), ("cookie", &cookie)]),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(identity.source, CredentialSource::SessionCookie);
    }

    #[test]
    fn expired_credentials_fail_with_or_without_secret() {
        let expired = token("s3cret", Some((Utc::now() - Duration::minutes(1)).timestamp()));
        let bearer = format!("Bearer {expired}");
        for secret in [Some("s3cret"), None] {
            let gateway = AuthGateway::new(secret, DEFAULT_SESSION_COOKIE);
            let rejection = gateway
                .authenticate(&headers(&[("authorization", &bearer)]), Utc::now())
                .unwrap_err();
            assert!(matches!(rejection.cause, Some(BridgeError::Auth(_))));
        }
    }

    #[test]
    fn legacy_cookie_only_in_open_mode() {
        let signed = token("whatever", None);
        let legacy = signed.rsplit_once('.').unwrap().0.to_string();
        let cookie = format!("{DEFAULT_SESSION_COOKIE}={legacy}");

        let open = AuthGateway::new(None, DEFAULT_SESSION_COOKIE);
        let identity = open
            .authenticate(&headers(&[("cookie", &cookie)]), Utc::now())
            .unwrap();
        assert_eq!(identity.source, CredentialSource::LegacyCookie);

        let closed = AuthGateway::new(Some("s3cret"), DEFAULT_SESSION_COOKIE);
        assert!(closed.authenticate(&headers(&[("cookie", &cookie)]), Utc::now()).is_err());
    }

    #[test]
    fn missing_credentials_report_generic_description() {
        let gateway = AuthGateway::new(None, DEFAULT_SESSION_COOKIE);
        let rejection = gateway.authenticate(&HeaderMap::new(), Utc::now()).unwrap_err();
        assert_eq!(rejection.description, "Missing access token");
        assert_eq!(rejection.cause, None);
    }

    #[test]
    fn challenge_uses_forwarded_scheme_and_sanitized_host() {
        let headers = headers(&[
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "bridge.example.com\",evil=\"x"),
        ]);
        let response = unauthorized_challenge(&headers, "Missing access token");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers()[WWW_AUTHENTICATE].to_str().unwrap();
        assert_eq!(
            challenge,
            "Bearer resource_metadata=\"https://bridge.example.com/.well-known/oauth-protected-resource\""
        );
    }

    #[test]
    fn base_url_defaults_to_http_host_header() {
        let headers = headers(&[("host", "localhost:8080"), ("x-forwarded-proto", "gopher")]);
        assert_eq!(request_base_url(&headers), "http://localhost:8080");
    }
}
