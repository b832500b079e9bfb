use std::time::Duration;

use reqwest::{Method, Url};
use serde_json::{Map, Value};
use toolbridge_core::catalog::{HttpMethod, RawCatalogEntry, parse_catalog};
use toolbridge_core::error::BridgeError;

/// Header carrying the authenticated subject on dispatched calls.
pub const SUBJECT_HEADER: &str = "x-authenticated-subject";

/// Thin client over the backend REST service. Every call carries its own
/// timeout; dropping the returned future cancels the request.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendVersion {
    pub build: String,
    pub document: Value,
}

#[derive(Debug)]
pub struct ApiCallResult {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiCallResult {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Best-effort error message from a JSON error body.
    pub fn error_message(&self) -> Option<String> {
        let body: Value = serde_json::from_slice(&self.body).ok()?;
        ["error_description", "message", "error", "detail"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(ToOwned::to_owned)
    }
}

pub fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

impl BackendClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, BridgeError> {
        let base_url = Url::parse(base_url.trim()).map_err(|e| {
            BridgeError::Configuration(format!("invalid backend URL '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::Configuration(format!(
                "backend URL '{base_url}' cannot carry paths"
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        })
    }

    /// Join path segments (already split, not yet encoded) and query pairs
    /// onto the base URL. Segments are percent-encoded here. No `?` is
    /// emitted when `query` is empty.
    pub fn endpoint_url(&self, segments: &[String], query: &[(String, String)]) -> Result<Url, BridgeError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                BridgeError::Configuration("backend URL cannot carry paths".to_string())
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn fixed_url(&self, path: &str) -> Result<Url, BridgeError> {
        let segments: Vec<String> = path
            .trim_start_matches('/')
            .split('/')
            .map(ToOwned::to_owned)
            .collect();
        self.endpoint_url(&segments, &[])
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// `GET /catalog`, refusing bodies larger than `max_bytes`.
    pub async fn fetch_catalog(
        &self,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<Vec<RawCatalogEntry>, BridgeError> {
        let url = self.fixed_url("/catalog")?;
        let response = self
            .authorized(self.http.get(url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| upstream_error("catalog", e))?;

        if !response.status().is_success() {
            return Err(BridgeError::UpstreamUnavailable(format!(
                "catalog endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let bytes = read_capped(response, max_bytes).await?;
        parse_catalog(&bytes)
    }

    /// `GET /version`. The build field may be a string or a number.
    pub async fn fetch_version(&self, timeout: Duration) -> Result<BackendVersion, BridgeError> {
        let url = self.fixed_url("/version")?;
        let response = self
            .authorized(self.http.get(url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| upstream_error("version", e))?;

        if !response.status().is_success() {
            return Err(BridgeError::UpstreamUnavailable(format!(
                "version endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let bytes = read_capped(response, 64 * 1024).await?;
        parse_version_document(&bytes)
    }

    /// Tier-2 default lookup: `GET /defaults/{source}` answering
    /// `{"value": ...}`. Any failure yields `None`.
    pub async fn lookup_default(&self, source: &str, timeout: Duration) -> Option<Value> {
        let url = self
            .endpoint_url(&["defaults".to_string(), source.to_string()], &[])
            .ok()?;
        let result = self
            .authorized(self.http.get(url))
            .timeout(timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(
                    event = "default_lookup_miss",
                    source = %source,
                    status = response.status().as_u16(),
                    "backend has no default for source"
                );
                return None;
            }
            Err(err) => {
                tracing::warn!(
                    event = "default_lookup_failed",
                    source = %source,
                    error = %err,
                    "backend default lookup failed"
                );
                return None;
            }
        };

        let body: Value = response.json().await.ok()?;
        body.get("value").filter(|value| !value.is_null()).cloned()
    }

    pub async fn send(
        &self,
        method: HttpMethod,
        url: Url,
        body: Option<Map<String, Value>>,
        subject: Option<&str>,
        timeout: Duration,
    ) -> Result<ApiCallResult, BridgeError> {
        let mut request = self
            .authorized(self.http.request(to_reqwest_method(method), url))
            .timeout(timeout);
        if let Some(subject) = subject {
            request = request.header(SUBJECT_HEADER, subject);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| upstream_error("dispatch", e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| upstream_error("dispatch", e))?;

        Ok(ApiCallResult {
            status,
            body: body.to_vec(),
        })
    }
}

fn upstream_error(call: &str, err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::UpstreamUnavailable(format!("{call} request timed out"))
    } else {
        BridgeError::UpstreamUnavailable(format!("{call} request failed: {err}"))
    }
}

async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>, BridgeError> {
    if response
        .content_length()
        .is_some_and(|length| length > limit as u64)
    {
        return Err(BridgeError::ResponseTooLarge { limit });
    }

    let mut buffer = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| upstream_error("body", e))?
    {
        if buffer.len() + chunk.len() > limit {
            return Err(BridgeError::ResponseTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

fn parse_version_document(bytes: &[u8]) -> Result<BackendVersion, BridgeError> {
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|e| BridgeError::Parse(format!("version document is not JSON: {e}")))?;
    let build = match document.get("build") {
        Some(Value::String(build)) if !build.trim().is_empty() => build.trim().to_string(),
        Some(Value::Number(build)) => build.to_string(),
        _ => {
            return Err(BridgeError::Parse(
                "version document has no build field".to_string(),
            ));
        }
    };
    Ok(BackendVersion { build, document })
}
