use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use toolbridge_core::catalog::{DroppedEntry, validate_catalog};
use toolbridge_core::error::{BridgeError, codes};

use crate::backend::BackendClient;
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::protocol::{MCP_SERVER_NAME, ToolError};
use crate::registry::{RegistryState, ToolAction, ToolRegistry};
use crate::util::to_pretty_json;
use crate::watcher::RefreshWatcher;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub build: Option<String>,
    pub tool_count: usize,
    pub dropped: Vec<DroppedEntry>,
}

/// Owns the live registry and everything that reads or rebuilds it.
#[derive(Debug)]
pub struct ToolBridge {
    config: BridgeConfig,
    backend: BackendClient,
    dispatcher: Dispatcher,
    registry: ToolRegistry,
    refresh_gate: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<RefreshWatcher>>,
}

impl ToolBridge {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let backend = BackendClient::new(&config.backend_url, config.backend_token.clone())?;
        let dispatcher = Dispatcher::new(
            backend.clone(),
            config.default_sources.clone(),
            config.version_timeout,
            config.dispatch_timeout,
        );
        Ok(Self {
            config,
            backend,
            dispatcher,
            registry: ToolRegistry::new(),
            refresh_gate: tokio::sync::Mutex::new(()),
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Manual refresh: reads the current build, then runs the shared cycle.
    pub async fn refresh(&self) -> Result<RefreshSummary, BridgeError> {
        let build = match self.backend.fetch_version(self.config.version_timeout).await {
            Ok(version) => Some(version.build),
            Err(err) => {
                tracing::warn!(
                    event = "version_fetch_failed",
                    error = %err,
                    "refreshing without a build identifier"
                );
                None
            }
        };
        self.refresh_with_build(build).await
    }

    /// Fetch, validate and build outside the lock, then swap tools and
    /// snapshot in one write. Any failure leaves the registry untouched.
    pub async fn refresh_with_build(
        &self,
        build: Option<String>,
    ) -> Result<RefreshSummary, BridgeError> {
        let _gate = self.refresh_gate.lock().await;

        let raw = self
            .backend
            .fetch_catalog(self.config.catalog_max_bytes, self.config.catalog_timeout)
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    event = "catalog_refresh_failed",
                    error = %err,
                    code = err.code(),
                    "catalog refresh aborted; keeping current tools"
                );
            })?;

        let report = validate_catalog(&raw, &self.config.api_prefix, build.clone());
        let state = RegistryState::from_catalog(report.catalog, Utc::now());
        let tool_count = state.tools.len();
        self.registry.replace(state).await;

        tracing::info!(
            event = "catalog_refreshed",
            build = build.as_deref().unwrap_or("unknown"),
            tools = tool_count,
            dropped = report.dropped.len(),
            "tool registry replaced"
        );

        Ok(RefreshSummary {
            build,
            tool_count,
            dropped: report.dropped,
        })
    }

    /// Bounded startup retries with a fixed delay. On exhaustion the registry
    /// keeps its empty tool set and the error is returned for logging.
    pub async fn initial_load_with_retry(&self) -> Result<RefreshSummary, BridgeError> {
        let attempts = self.config.startup_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.refresh().await {
                Ok(summary) => return Ok(summary),
                Err(err) if attempt < attempts => {
                    tracing::warn!(
                        event = "catalog_initial_load_retry",
                        attempt,
                        attempts,
                        error = %err,
                        "initial catalog load failed; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.startup_retry_delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        event = "catalog_initial_load_failed",
                        attempts,
                        error = %err,
                        "starting with an empty tool set"
                    );
                    return Err(err);
                }
            }
        }
    }

    pub async fn call_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
        subject: Option<&str>,
    ) -> Result<String, ToolError> {
        let tool = self.registry.lookup(name).await.ok_or_else(|| {
            ToolError::new(codes::NOT_FOUND, format!("Unknown tool: {name}"))
                .with_field("name")
                .with_docs_hint("Call tools/list for the current tool set.")
        })?;

        match tool.action {
            ToolAction::Version => Ok(to_pretty_json(&self.version_payload().await)),
            ToolAction::Catalog(entry) => self
                .dispatcher
                .dispatch(&entry, args, subject)
                .await
                .map_err(ToolError::from),
        }
    }

    /// Never fails: the backend section is left out when it cannot be read.
    pub async fn version_payload(&self) -> Value {
        let snapshot = self.registry.snapshot().await;
        let mut payload = json!({
            "service": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "catalog": {
                "build": snapshot.catalog.build,
                "tool_count": snapshot.catalog.entries.len(),
                "refreshed_at": snapshot.refreshed_at,
            }
        });
        match self.backend.fetch_version(self.config.version_timeout).await {
            Ok(version) => payload["backend"] = version.document,
            Err(err) => {
                tracing::debug!(
                    event = "version_tool_backend_unavailable",
                    error = %err,
                    "omitting backend version"
                );
            }
        }
        payload
    }

    /// Spawn the refresh watcher once. Later calls are no-ops while it runs.
    pub async fn start_watcher(self: &Arc<Self>) {
        let initial_build = self.registry.snapshot().await.catalog.build;
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|watcher| !watcher.is_stopped()) {
            return;
        }
        *slot = Some(RefreshWatcher::spawn(Arc::clone(self), initial_build));
    }

    /// Idempotent.
    pub fn shutdown(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.stop();
            tracing::info!(event = "refresh_watcher_stopped", "refresh watcher stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VERSION_TOOL_NAME;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(uri: &str) -> BridgeConfig {
        let mut config = BridgeConfig::new(uri);
        config.startup_attempts = 2;
        config.startup_retry_delay = Duration::from_millis(10);
        config.version_timeout = Duration::from_secs(2);
        config.catalog_timeout = Duration::from_secs(2);
        config.dispatch_timeout = Duration::from_secs(2);
        config
    }

    async fn mount_version(server: &MockServer, build: &str) {
        Mock::given(method("GET"))
            .and(path("/version"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"build": build, "commit": "abc"})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn failed_fetch_leaves_tools_and_snapshot_untouched() {
        let server = MockServer::start().await;
        mount_version(&server, "100").await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "list_items", "method": "GET", "path": "/api/items"}
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let bridge = ToolBridge::new(test_config(&server.uri())).unwrap();
        bridge.refresh().await.unwrap();
        let before = bridge.registry().current().await;

        let err = bridge.refresh().await.unwrap_err();
        assert!(matches!(err, BridgeError::UpstreamUnavailable(_)));

        let after = bridge.registry().current().await;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(
            serde_json::to_string(&before.snapshot).unwrap(),
            serde_json::to_string(&after.snapshot).unwrap()
        );
    }

    #[tokio::test]
    async fn catalog_defined_version_tool_is_replaced_by_reserved_one() {
        let server = MockServer::start().await;
        mount_version(&server, "7").await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "get_version", "method": "GET", "path": "/api/version"},
                {"name": "get_price", "method": "GET", "path": "/api/price/{ticker}",
                 "params": [{"name": "ticker", "type": "string", "required": true, "in": "path"}]}
            ])))
            .mount(&server)
            .await;

        let bridge = ToolBridge::new(test_config(&server.uri())).unwrap();
        let summary = bridge.refresh().await.unwrap();
        assert_eq!(summary.build.as_deref(), Some("7"));
        assert_eq!(summary.tool_count, 2);

        let text = bridge
            .call_tool(VERSION_TOOL_NAME, &Map::new(), None)
            .await
            .unwrap();
        let payload: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(payload["service"]["name"], json!("toolbridge"));
        assert_eq!(payload["backend"]["commit"], json!("abc"));
        assert_eq!(payload["catalog"]["build"], json!("7"));
    }

    #[tokio::test]
    async fn version_tool_omits_backend_when_unreachable() {
        let bridge = ToolBridge::new(test_config("http://127.0.0.1:9")).unwrap();
        let text = bridge
            .call_tool(VERSION_TOOL_NAME, &Map::new(), None)
            .await
            .unwrap();
        let payload: Value = serde_json::from_str(&text).unwrap();
        assert!(payload.get("backend").is_none());
        assert_eq!(payload["catalog"]["tool_count"], json!(0));
    }

    #[tokio::test]
    async fn initial_load_degrades_to_empty_tool_set() {
        let server = MockServer::start().await;
        mount_version(&server, "1").await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(2)
            .mount(&server)
            .await;

        let bridge = ToolBridge::new(test_config(&server.uri())).unwrap();
        let err = bridge.initial_load_with_retry().await.unwrap_err();
        assert!(matches!(err, BridgeError::Parse(_)));
        let tools = bridge.registry().list().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, VERSION_TOOL_NAME);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_error() {
        let bridge = ToolBridge::new(test_config("http://127.0.0.1:9")).unwrap();
        let err = bridge.call_tool("nope", &Map::new(), None).await.unwrap_err();
        assert_eq!(err.code, codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let server = MockServer::start().await;
        mount_version(&server, "1").await;
        let bridge = Arc::new(ToolBridge::new(test_config(&server.uri())).unwrap());
        bridge.start_watcher().await;
        bridge.start_watcher().await;
        bridge.shutdown();
        bridge.shutdown();
    }
}
