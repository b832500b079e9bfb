//! Catalog data model and the validation pipeline that turns a raw backend
//! document into a [`ValidatedCatalog`].
//!
//! Raw entries are deserialized leniently (every field optional, every
//! discriminator a plain string) so that one malformed entry never poisons
//! the whole document. Closed enums are only produced by [`validate_entry`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Prefix every catalog path must start with unless configured otherwise.
pub const DEFAULT_API_PREFIX: &str = "/api/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared parameter type. Unknown or missing types fall back to `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "number" | "integer" => ParamType::Number,
            "boolean" | "bool" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => ParamType::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
}

impl ParamLocation {
    /// Missing location means query. Anything outside path/query/body is
    /// rejected so the entry is excluded at validation time.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(|value| value.trim().to_ascii_lowercase()) {
            None => Some(ParamLocation::Query),
            Some(value) if value.is_empty() => Some(ParamLocation::Query),
            Some(value) => match value.as_str() {
                "path" => Some(ParamLocation::Path),
                "query" => Some(ParamLocation::Query),
                "body" => Some(ParamLocation::Body),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(rename = "in")]
    pub location: ParamLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<Parameter>,
}

/// Entry exactly as the backend sent it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCatalogEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub params: Vec<RawParameter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParameter {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "in")]
    pub location: Option<String>,
    #[serde(default)]
    pub default_from: Option<String>,
}

/// Deduplicated, filtered entries from one fetch plus the build identifier
/// observed when they were fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatedCatalog {
    pub build: Option<String>,
    pub entries: Vec<CatalogEntry>,
}

/// Why an entry was left out of the validated catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedEntry {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub catalog: ValidatedCatalog,
    pub dropped: Vec<DroppedEntry>,
}

/// Parse the catalog document. The document must be a JSON array; the
/// elements are parsed leniently one by one.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<RawCatalogEntry>, BridgeError> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(bytes)
        .map_err(|e| BridgeError::Parse(format!("catalog is not a JSON array: {e}")))?;

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value).unwrap_or_else(|err| {
                tracing::warn!(
                    event = "catalog_entry_unreadable",
                    index = index,
                    error = %err,
                    "catalog entry has the wrong shape"
                );
                RawCatalogEntry::default()
            })
        })
        .collect())
}

/// Validate a single entry. Errors are always `BridgeError::Validation`.
pub fn validate_entry(raw: &RawCatalogEntry, api_prefix: &str) -> Result<CatalogEntry, BridgeError> {
    let name = raw.name.trim();
    let invalid = |reason: String| BridgeError::Validation {
        entry: if name.is_empty() {
            "<unnamed>".to_string()
        } else {
            name.to_string()
        },
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty".to_string()));
    }

    let method = HttpMethod::parse(&raw.method)
        .ok_or_else(|| invalid(format!("unsupported method '{}'", raw.method.trim())))?;

    let path = raw.path.trim();
    if path.is_empty() {
        return Err(invalid("path must not be empty".to_string()));
    }
    if !path.starts_with(api_prefix) {
        return Err(invalid(format!("path must start with '{api_prefix}'")));
    }
    if has_traversal(path) {
        return Err(invalid("path must not contain traversal segments".to_string()));
    }

    let mut params = Vec::with_capacity(raw.params.len());
    for param in &raw.params {
        let param_name = param.name.trim();
        if param_name.is_empty() {
            return Err(invalid("parameter name must not be empty".to_string()));
        }
        let location = ParamLocation::parse(param.location.as_deref()).ok_or_else(|| {
            invalid(format!(
                "parameter '{param_name}' has unsupported location '{}'",
                param.location.as_deref().unwrap_or_default()
            ))
        })?;
        params.push(Parameter {
            name: param_name.to_string(),
            param_type: ParamType::parse(&param.param_type),
            description: param.description.clone(),
            required: param.required,
            location,
            default_from: param
                .default_from
                .as_deref()
                .map(str::trim)
                .filter(|source| !source.is_empty())
                .map(ToOwned::to_owned),
        });
    }

    Ok(CatalogEntry {
        name: name.to_string(),
        description: raw.description.clone(),
        method,
        path: path.to_string(),
        params,
    })
}

/// Validate every entry and drop duplicates, keeping the first occurrence.
/// Nothing in here is fatal; rejected entries are logged and reported.
pub fn validate_catalog(
    raw: &[RawCatalogEntry],
    api_prefix: &str,
    build: Option<String>,
) -> ValidationReport {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.len());
    let mut dropped = Vec::new();

    for item in raw {
        match validate_entry(item, api_prefix) {
            Ok(entry) => {
                if seen.insert(entry.name.clone()) {
                    entries.push(entry);
                } else {
                    tracing::warn!(
                        event = "catalog_entry_duplicate",
                        tool = %entry.name,
                        "duplicate catalog entry dropped; first occurrence kept"
                    );
                    dropped.push(DroppedEntry {
                        name: entry.name,
                        reason: "duplicate name".to_string(),
                    });
                }
            }
            Err(BridgeError::Validation { entry, reason }) => {
                tracing::warn!(
                    event = "catalog_entry_invalid",
                    tool = %entry,
                    reason = %reason,
                    "catalog entry dropped"
                );
                dropped.push(DroppedEntry { name: entry, reason });
            }
            Err(other) => {
                tracing::warn!(
                    event = "catalog_entry_invalid",
                    error = %other,
                    "catalog entry dropped"
                );
                dropped.push(DroppedEntry {
                    name: item.name.clone(),
                    reason: other.to_string(),
                });
            }
        }
    }

    ValidationReport {
        catalog: ValidatedCatalog { build, entries },
        dropped,
    }
}

fn has_traversal(path: &str) -> bool {
    if path.contains('\\') {
        return true;
    }
    path.split('/').any(|segment| {
        let decoded = segment
            .to_ascii_lowercase()
            .replace("%2e", ".")
            .replace("%2f", "/");
        decoded == ".." || decoded == "." || decoded.split('/').any(|part| part == "..")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawCatalogEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn invalid_entries_are_dropped_without_stopping_validation() {
        let entries = vec![
            raw(json!({"name": "", "method": "GET", "path": "/api/a"})),
            raw(json!({"name": "no_method", "method": "", "path": "/api/a"})),
            raw(json!({"name": "bad_method", "method": "TRACE", "path": "/api/a"})),
            raw(json!({"name": "no_path", "method": "GET", "path": ""})),
            raw(json!({"name": "no_prefix", "method": "GET", "path": "/internal/a"})),
            raw(json!({"name": "traversal", "method": "GET", "path": "/api/../admin"})),
            raw(json!({"name": "encoded", "method": "GET", "path": "/api/%2E%2E/admin"})),
            raw(json!({"name": "ok", "method": "get", "path": "/api/ok"})),
        ];

        let report = validate_catalog(&entries, DEFAULT_API_PREFIX, None);
        let names: Vec<&str> = report
            .catalog
            .entries
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["ok"]);
        assert_eq!(report.dropped.len(), 7);
        assert_eq!(report.catalog.entries[0].method, HttpMethod::Get);
    }

    #[test]
    fn duplicate_names_keep_first_occurrence() {
        let entries = vec![
            raw(json!({"name": "dup", "description": "first", "method": "GET", "path": "/api/one"})),
            raw(json!({"name": "dup", "description": "second", "method": "POST", "path": "/api/two"})),
        ];
        let report = validate_catalog(&entries, DEFAULT_API_PREFIX, Some("7".to_string()));
        assert_eq!(report.catalog.entries.len(), 1);
        assert_eq!(report.catalog.entries[0].description, "first");
        assert_eq!(report.catalog.build.as_deref(), Some("7"));
        assert_eq!(report.dropped[0].reason, "duplicate name");
    }

    #[test]
    fn unknown_parameter_location_rejects_entry() {
        let entry = raw(json!({
            "name": "header_param",
            "method": "GET",
            "path": "/api/x",
            "params": [{"name": "token", "in": "header"}]
        }));
        let err = validate_entry(&entry, DEFAULT_API_PREFIX).unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
    }

    #[test]
    fn parameters_default_to_query_and_string() {
        let entry = raw(json!({
            "name": "search",
            "method": "GET",
            "path": "/api/search",
            "params": [{"name": "q", "default_from": "  "}]
        }));
        let entry = validate_entry(&entry, DEFAULT_API_PREFIX).unwrap();
        assert_eq!(entry.params[0].location, ParamLocation::Query);
        assert_eq!(entry.params[0].param_type, ParamType::String);
        assert_eq!(entry.params[0].default_from, None);
    }

    #[test]
    fn parse_catalog_rejects_malformed_json() {
        let err = parse_catalog(b"{not json").unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));

        let err = parse_catalog(br#"{"name": "x"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
    }

    #[test]
    fn parse_catalog_tolerates_misshapen_elements() {
        let parsed = parse_catalog(br#"[{"name": 5}, {"name": "ok", "method": "GET", "path": "/api/ok"}]"#)
            .unwrap();
        assert_eq!(parsed.len(), 2);
        let report = validate_catalog(&parsed, DEFAULT_API_PREFIX, None);
        assert_eq!(report.catalog.entries.len(), 1);
    }
}
