use std::collections::HashMap;
use std::time::Duration;

use toolbridge_core::catalog::DEFAULT_API_PREFIX;
use toolbridge_core::error::BridgeError;

use crate::util::{non_empty_env, parse_env_u64_with_bounds};

pub const BACKEND_URL_ENV: &str = "TOOLBRIDGE_BACKEND_URL";
pub const BACKEND_TOKEN_ENV: &str = "TOOLBRIDGE_BACKEND_TOKEN";
pub const API_PREFIX_ENV: &str = "TOOLBRIDGE_API_PREFIX";
pub const CATALOG_MAX_BYTES_ENV: &str = "TOOLBRIDGE_CATALOG_MAX_BYTES";
pub const POLL_INTERVAL_ENV: &str = "TOOLBRIDGE_POLL_INTERVAL_SECS";
pub const VERSION_TIMEOUT_ENV: &str = "TOOLBRIDGE_VERSION_TIMEOUT_SECS";
pub const CATALOG_TIMEOUT_ENV: &str = "TOOLBRIDGE_CATALOG_TIMEOUT_SECS";
pub const DISPATCH_TIMEOUT_ENV: &str = "TOOLBRIDGE_DISPATCH_TIMEOUT_SECS";
pub const STARTUP_ATTEMPTS_ENV: &str = "TOOLBRIDGE_STARTUP_ATTEMPTS";
pub const STARTUP_RETRY_DELAY_ENV: &str = "TOOLBRIDGE_STARTUP_RETRY_DELAY_SECS";
pub const DEFAULT_CANDIDATES_ENV: &str = "TOOLBRIDGE_DEFAULT_CANDIDATES";

const DEFAULT_CATALOG_MAX_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_VERSION_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 15;
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STARTUP_ATTEMPTS: u64 = 5;
const DEFAULT_STARTUP_RETRY_DELAY_SECS: u64 = 2;

/// Candidate values for parameter defaults, keyed by the opaque
/// `default_from` source string. Tier 1 of default resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultSources {
    candidates: HashMap<String, Vec<String>>,
}

impl DefaultSources {
    /// Parse `{"source": ["first", "second"], ...}`.
    pub fn from_json(raw: &str) -> Result<Self, BridgeError> {
        let candidates: HashMap<String, Vec<String>> = serde_json::from_str(raw).map_err(|e| {
            BridgeError::Configuration(format!(
                "{DEFAULT_CANDIDATES_ENV} must be a JSON object of string arrays: {e}"
            ))
        })?;
        Ok(Self { candidates })
    }

    pub fn with_candidates(mut self, source: impl Into<String>, values: Vec<String>) -> Self {
        self.candidates.insert(source.into(), values);
        self
    }

    pub fn first_candidate(&self, source: &str) -> Option<&str> {
        self.candidates
            .get(source)?
            .iter()
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub backend_url: String,
    pub backend_token: Option<String>,
    pub api_prefix: String,
    pub catalog_max_bytes: usize,
    pub poll_interval: Duration,
    pub version_timeout: Duration,
    pub catalog_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub startup_attempts: u32,
    pub startup_retry_delay: Duration,
    pub default_sources: DefaultSources,
}

impl BridgeConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into().trim().trim_end_matches('/').to_string(),
            backend_token: None,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            catalog_max_bytes: DEFAULT_CATALOG_MAX_BYTES as usize,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            version_timeout: Duration::from_secs(DEFAULT_VERSION_TIMEOUT_SECS),
            catalog_timeout: Duration::from_secs(DEFAULT_CATALOG_TIMEOUT_SECS),
            dispatch_timeout: Duration::from_secs(DEFAULT_DISPATCH_TIMEOUT_SECS),
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS as u32,
            startup_retry_delay: Duration::from_secs(DEFAULT_STARTUP_RETRY_DELAY_SECS),
            default_sources: DefaultSources::default(),
        }
    }

    /// Load from `TOOLBRIDGE_*` variables. `backend_url` overrides the env
    /// value when given (CLI flag wins).
    pub fn from_env(backend_url: Option<&str>) -> Result<Self, BridgeError> {
        let backend_url = backend_url
            .map(ToOwned::to_owned)
            .or_else(|| non_empty_env(BACKEND_URL_ENV))
            .ok_or_else(|| {
                BridgeError::Configuration(format!("{BACKEND_URL_ENV} must be set"))
            })?;

        let mut config = Self::new(backend_url);
        config.backend_token = non_empty_env(BACKEND_TOKEN_ENV);
        if let Some(prefix) = non_empty_env(API_PREFIX_ENV) {
            config.api_prefix = prefix;
        }

        let env = |key: &str| std::env::var(key).ok();
        let (max_bytes, _) = parse_env_u64_with_bounds(
            env(CATALOG_MAX_BYTES_ENV),
            1024,
            64 * 1024 * 1024,
            DEFAULT_CATALOG_MAX_BYTES,
        );
        config.catalog_max_bytes = max_bytes as usize;
        config.poll_interval = secs(env(POLL_INTERVAL_ENV), 1, 3600, DEFAULT_POLL_INTERVAL_SECS);
        config.version_timeout = secs(env(VERSION_TIMEOUT_ENV), 1, 60, DEFAULT_VERSION_TIMEOUT_SECS);
        config.catalog_timeout = secs(env(CATALOG_TIMEOUT_ENV), 1, 300, DEFAULT_CATALOG_TIMEOUT_SECS);
        config.dispatch_timeout =
            secs(env(DISPATCH_TIMEOUT_ENV), 1, 600, DEFAULT_DISPATCH_TIMEOUT_SECS);
        let (attempts, _) =
            parse_env_u64_with_bounds(env(STARTUP_ATTEMPTS_ENV), 1, 100, DEFAULT_STARTUP_ATTEMPTS);
        config.startup_attempts = attempts as u32;
        config.startup_retry_delay = secs(
            env(STARTUP_RETRY_DELAY_ENV),
            0,
            300,
            DEFAULT_STARTUP_RETRY_DELAY_SECS,
        );
        if let Some(raw) = non_empty_env(DEFAULT_CANDIDATES_ENV) {
            config.default_sources = DefaultSources::from_json(&raw)?;
        }

        Ok(config)
    }
}

fn secs(raw: Option<String>, min: u64, max: u64, default: u64) -> Duration {
    Duration::from_secs(parse_env_u64_with_bounds(raw, min, max, default).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_candidate_skips_blank_values() {
        let sources = DefaultSources::from_json(r#"{"account": ["", "  ", "acc-1", "acc-2"]}"#).unwrap();
        assert_eq!(sources.first_candidate("account"), Some("acc-1"));
        assert_eq!(sources.first_candidate("missing"), None);
    }

    #[test]
    fn malformed_candidates_are_a_configuration_error() {
        let err = DefaultSources::from_json(r#"{"account": "acc-1"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn new_trims_trailing_slash_from_backend_url() {
        let config = BridgeConfig::new("http://backend.local:8080/ ");
        assert_eq!(config.backend_url, "http://backend.local:8080");
        assert_eq!(config.api_prefix, "/api/");
    }
}
