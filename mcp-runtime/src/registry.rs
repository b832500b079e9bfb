use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use toolbridge_core::catalog::{CatalogEntry, ValidatedCatalog};
use toolbridge_core::schema::{ToolSchema, build_tool_schema};

/// Reserved composite tool, always registered last.
pub const VERSION_TOOL_NAME: &str = "get_version";

#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    Catalog(Arc<CatalogEntry>),
    Version,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    pub schema: ToolSchema,
    pub action: ToolAction,
}

pub fn version_tool_schema() -> ToolSchema {
    ToolSchema {
        name: VERSION_TOOL_NAME.to_string(),
        description: "Report the bridge service version and the backend's version document."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
    }
}

/// The full tool set built from one validated catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSet {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolSet {
    pub fn build(catalog: &ValidatedCatalog) -> Self {
        let mut set = Self::default();
        for entry in &catalog.entries {
            set.insert(RegisteredTool {
                schema: build_tool_schema(entry),
                action: ToolAction::Catalog(Arc::new(entry.clone())),
            });
        }
        set.insert(RegisteredTool {
            schema: version_tool_schema(),
            action: ToolAction::Version,
        });
        set
    }

    fn insert(&mut self, tool: RegisteredTool) {
        let name = tool.schema.name.clone();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(
                event = "tool_name_collision",
                tool = %name,
                "later registration replaced an existing tool"
            );
        } else {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Tools in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogSnapshot {
    pub catalog: ValidatedCatalog,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Tools and snapshot from the same refresh. Swapped as one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryState {
    pub tools: ToolSet,
    pub snapshot: CatalogSnapshot,
}

impl RegistryState {
    pub fn from_catalog(catalog: ValidatedCatalog, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            tools: ToolSet::build(&catalog),
            snapshot: CatalogSnapshot {
                catalog,
                refreshed_at: Some(refreshed_at),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    state: Arc<RwLock<Arc<RegistryState>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Starts with only the version tool registered.
    pub fn new() -> Self {
        let initial = RegistryState {
            tools: ToolSet::build(&ValidatedCatalog::default()),
            snapshot: CatalogSnapshot::default(),
        };
        Self {
            state: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Consistent view of tools and snapshot. Holding the returned `Arc`
    /// never blocks a writer.
    pub async fn current(&self) -> Arc<RegistryState> {
        self.state.read().await.clone()
    }

    pub async fn snapshot(&self) -> CatalogSnapshot {
        self.current().await.snapshot.clone()
    }

    pub async fn lookup(&self, name: &str) -> Option<RegisteredTool> {
        self.state.read().await.tools.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<ToolSchema> {
        self.current()
            .await
            .tools
            .iter()
            .map(|tool| tool.schema.clone())
            .collect()
    }

    pub async fn replace(&self, next: RegistryState) -> Arc<RegistryState> {
        let next = Arc::new(next);
        let mut guard = self.state.write().await;
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbridge_core::catalog::HttpMethod;

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            description: format!("{name} tool"),
            method: HttpMethod::Get,
            path: format!("/api/{name}"),
            params: Vec::new(),
        }
    }

    fn catalog(names: &[&str], build: &str) -> ValidatedCatalog {
        ValidatedCatalog {
            build: Some(build.to_string()),
            entries: names.iter().map(|name| entry(name)).collect(),
        }
    }

    #[test]
    fn version_tool_is_appended_last() {
        let set = ToolSet::build(&catalog(&["a", "b"], "1"));
        let names: Vec<_> = set.iter().map(|tool| tool.schema.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", VERSION_TOOL_NAME]);
    }

    #[test]
    fn version_tool_wins_name_collision() {
        let set = ToolSet::build(&catalog(&[VERSION_TOOL_NAME, "a"], "1"));
        assert_eq!(set.len(), 2);
        let tool = set.get(VERSION_TOOL_NAME).unwrap();
        assert_eq!(tool.action, ToolAction::Version);
        assert_eq!(tool.schema, version_tool_schema());
    }

    #[tokio::test]
    async fn new_registry_exposes_only_version_tool() {
        let registry = ToolRegistry::new();
        let tools = registry.list().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, VERSION_TOOL_NAME);
        assert_eq!(registry.snapshot().await.refreshed_at, None);
    }

    #[tokio::test]
    async fn concurrent_readers_see_whole_states() {
        let registry = ToolRegistry::new();
        let old = RegistryState::from_catalog(catalog(&["a"], "1"), Utc::now());
        let new = RegistryState::from_catalog(catalog(&["b", "c"], "2"), Utc::now());
        registry.replace(old).await;

        let readers: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    for _ in 0..50 {
                        let state = registry.current().await;
                        let names: Vec<String> =
                            state.tools.iter().map(|t| t.schema.name.clone()).collect();
                        seen.push((state.snapshot.catalog.build.clone(), names));
                        tokio::task::yield_now().await;
                    }
                    seen
                })
            })
            .collect();

        registry.replace(new).await;

        for reader in readers {
            for (build, names) in reader.await.unwrap() {
                match build.as_deref() {
                    Some("1") => assert_eq!(names, vec!["a", VERSION_TOOL_NAME]),
                    Some("2") => assert_eq!(names, vec!["b", "c", VERSION_TOOL_NAME]),
                    other => panic!("unexpected build {other:?}"),
                }
            }
        }
    }
}
