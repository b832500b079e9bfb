use std::time::Duration;

use serde_json::{Map, Number, Value};
use thiserror::Error;
use toolbridge_core::catalog::{CatalogEntry, ParamLocation, Parameter};
use toolbridge_core::error::BridgeError;

use crate::backend::BackendClient;
use crate::config::DefaultSources;

/// A resolved argument value, typed at the dispatch boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Number(Number),
    Boolean(bool),
    StringArray(Vec<String>),
    Object(Map<String, Value>),
}

impl ParamValue {
    /// `null` and the empty string count as "not provided".
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::Bool(b) => Some(Self::Boolean(*b)),
            Value::Array(items) => Some(Self::StringArray(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(scalar_text)
                    .collect(),
            )),
            Value::Object(map) => Some(Self::Object(map.clone())),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::StringArray(items) => items.iter().all(String::is_empty),
            Self::Object(map) => map.is_empty(),
            Self::Number(_) | Self::Boolean(_) => false,
        }
    }

    /// Single-segment rendering for path substitution. Encoding happens later.
    pub fn as_path_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::StringArray(items) => items.join(","),
            Self::Object(map) => Value::Object(map.clone()).to_string(),
        }
    }

    /// Query rendering. Arrays repeat the key once per non-empty item.
    pub fn query_values(&self) -> Vec<String> {
        match self {
            Self::StringArray(items) => items.iter().filter(|s| !s.is_empty()).cloned().collect(),
            other if other.is_empty() => Vec::new(),
            other => vec![other.as_path_text()],
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Boolean(b) => Value::Bool(*b),
            Self::StringArray(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            Self::Object(map) => Value::Object(map.clone()),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("path placeholder '{{{0}}}' has no value")]
    UnfilledPlaceholder(String),
    #[error("path parameter '{0}' must not be '.' or '..'")]
    DotSegment(String),
    #[error("{message}")]
    Backend { status: u16, message: String },
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl DispatchError {
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingParameter(name)
            | Self::UnfilledPlaceholder(name)
            | Self::DotSegment(name) => Some(name),
            _ => None,
        }
    }
}

/// Resolved request for one tool invocation, before it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: reqwest::Url,
    pub body: Option<Map<String, Value>>,
}

/// Turns a catalog entry plus caller arguments into one backend call.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    backend: BackendClient,
    defaults: DefaultSources,
    lookup_timeout: Duration,
    dispatch_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        backend: BackendClient,
        defaults: DefaultSources,
        lookup_timeout: Duration,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            defaults,
            lookup_timeout,
            dispatch_timeout,
        }
    }

    pub async fn dispatch(
        &self,
        entry: &CatalogEntry,
        args: &Map<String, Value>,
        subject: Option<&str>,
    ) -> Result<String, DispatchError> {
        let prepared = self.prepare(entry, args).await?;

        tracing::debug!(
            event = "tool_dispatch",
            tool = %entry.name,
            method = %entry.method,
            path = %prepared.url.path(),
            has_body = prepared.body.is_some(),
            "dispatching tool call"
        );

        let result = self
            .backend
            .send(
                entry.method,
                prepared.url,
                prepared.body,
                subject,
                self.dispatch_timeout,
            )
            .await?;

        if !result.is_success() {
            let message = result
                .error_message()
                .unwrap_or_else(|| format!("backend returned HTTP {}", result.status));
            tracing::info!(
                event = "tool_dispatch_rejected",
                tool = %entry.name,
                status = result.status,
                "backend rejected tool call"
            );
            return Err(DispatchError::Backend {
                status: result.status,
                message,
            });
        }

        Ok(result.body_text())
    }

    /// Resolve every parameter in declaration order and build the URL and
    /// body. A required path parameter that stays unresolved fails here,
    /// before the dispatch request is issued.
    pub async fn prepare(
        &self,
        entry: &CatalogEntry,
        args: &Map<String, Value>,
    ) -> Result<PreparedRequest, DispatchError> {
        let mut path_values: Vec<(&str, String)> = Vec::new();
        let mut query: Vec<(String, String)> = Vec::new();
        let mut body = Map::new();

        for param in &entry.params {
            let value = self.resolve(param, args).await;
            match param.location {
                ParamLocation::Path => match value {
                    Some(value) if !value.is_empty() => {
                        path_values.push((param.name.as_str(), value.as_path_text()));
                    }
                    _ if param.required => {
                        return Err(DispatchError::MissingParameter(param.name.clone()));
                    }
                    _ => {}
                },
                ParamLocation::Query => {
                    if let Some(value) = value {
                        for item in value.query_values() {
                            query.push((param.name.clone(), item));
                        }
                    }
                }
                ParamLocation::Body => {
                    if let Some(value) = value {
                        body.insert(param.name.clone(), value.to_json());
                    }
                }
            }
        }

        let segments = fill_path_template(&entry.path, &path_values)?;
        let url = self.backend.endpoint_url(&segments, &query)?;
        Ok(PreparedRequest {
            url,
            body: (!body.is_empty()).then_some(body),
        })
    }

    async fn resolve(&self, param: &Parameter, args: &Map<String, Value>) -> Option<ParamValue> {
        if let Some(value) = args.get(&param.name).and_then(ParamValue::from_json) {
            return Some(value);
        }
        let source = param.default_from.as_deref()?;

        if let Some(candidate) = self.defaults.first_candidate(source) {
            return Some(ParamValue::String(candidate.to_string()));
        }

        let looked_up = self.backend.lookup_default(source, self.lookup_timeout).await?;
        let value = ParamValue::from_json(&looked_up);
        if value.is_some() {
            tracing::debug!(
                event = "default_resolved_remote",
                param = %param.name,
                source = %source,
                "parameter default resolved from backend"
            );
        }
        value
    }
}

/// Split a `/api/items/{id}` style template into raw segments with
/// placeholders substituted. Segment encoding is left to the URL builder so
/// a value can never introduce a new path segment.
pub fn fill_path_template(
    template: &str,
    values: &[(&str, String)],
) -> Result<Vec<String>, DispatchError> {
    template
        .trim_start_matches('/')
        .split('/')
        .map(|segment| fill_segment(segment, values))
        .collect()
}

fn fill_segment(segment: &str, values: &[(&str, String)]) -> Result<String, DispatchError> {
    let mut out = String::with_capacity(segment.len());
    let mut filled_by: Option<&str> = None;
    let mut rest = segment;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        let value = values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| DispatchError::UnfilledPlaceholder(name.to_string()))?;
        out.push_str(&rest[..open]);
        out.push_str(value);
        filled_by.get_or_insert(name);
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);

    // the URL builder drops dot segments, which would change the route
    if let Some(name) = filled_by {
        if out == "." || out == ".." {
            return Err(DispatchError::DotSegment(name.to_string()));
        }
    }
    Ok(out)
}
