use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::catalog::{CatalogEntry, ParamType};

/// What `tools/list` advertises for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn json_schema_type(param_type: ParamType) -> Value {
    match param_type {
        ParamType::Number => json!({ "type": "number" }),
        ParamType::Boolean => json!({ "type": "boolean" }),
        ParamType::Array => json!({ "type": "array", "items": { "type": "string" } }),
        ParamType::String | ParamType::Object => json!({ "type": "string" }),
    }
}

/// Convert a validated entry into its invocation schema.
pub fn build_tool_schema(entry: &CatalogEntry) -> ToolSchema {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in &entry.params {
        let mut property = json_schema_type(param.param_type);
        if !param.description.is_empty() {
            property["description"] = Value::String(param.description.clone());
        }
        properties.insert(param.name.clone(), property);
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }

    ToolSchema {
        name: entry.name.clone(),
        description: entry.description.clone(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}
