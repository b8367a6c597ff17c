//! Statically configured proxy tools (catalog mode).
//!
//! When the config declares `tools`, `tools/call` is restricted to those
//! names and each tool may carry its own upstream security override. The
//! declared args also generate the JSON Schema shown on surfaces such as the
//! standalone host's `/map` endpoint.

use crate::config::{ToolArg, ToolConfig};
use serde_json::{Map, Value, json};

/// Build the JSON Schema for a configured tool's arguments.
#[must_use]
pub fn input_schema(tool: &ToolConfig) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for arg in &tool.args {
        properties.insert(arg.name.clone(), arg_schema(arg));
        if arg.required {
            required.push(Value::String(arg.name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn arg_schema(arg: &ToolArg) -> Value {
    let mut schema = Map::new();
    schema.insert(
        "type".to_string(),
        Value::String(arg.arg_type.json_schema_type().to_string()),
    );
    schema.insert(
        "description".to_string(),
        Value::String(arg.description.clone()),
    );
    if let Some(default) = &arg.default {
        schema.insert("default".to_string(), default.clone());
    }
    if let Some(allowed) = &arg.r#enum
        && !allowed.is_empty()
    {
        schema.insert("enum".to_string(), Value::Array(allowed.clone()));
    }
    Value::Object(schema)
}

/// Tool metadata entries in `tools/list` shape, for diagnostic surfaces.
#[must_use]
pub fn catalog_entries(tools: &[ToolConfig]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": input_schema(t),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    fn config_with_tool() -> ProxyConfig {
        ProxyConfig::from_yaml(
            r#"
server:
  name: backend
  type: mcp-proxy
  transport: http
  mcpServerURL: http://backend.internal/mcp
tools:
  - name: forecast
    description: Get a weather forecast
    args:
      - name: city
        description: City name
        type: string
        required: true
      - name: days
        description: Days ahead
        type: integer
        default: 3
      - name: units
        description: Unit system
        type: string
        enum: ["metric", "imperial"]
"#,
        )
        .expect("valid yaml")
    }

    #[test]
    fn schema_includes_required_defaults_and_enums() {
        let cfg = config_with_tool();
        let schema = input_schema(cfg.tool("forecast").unwrap());

        assert_eq!(schema["type"], json!("object"));
        assert_eq!(schema["required"], json!(["city"]));
        assert_eq!(schema["properties"]["city"]["type"], json!("string"));
        assert_eq!(schema["properties"]["days"]["default"], json!(3));
        assert_eq!(
            schema["properties"]["units"]["enum"],
            json!(["metric", "imperial"])
        );
        assert!(schema["properties"]["days"].get("enum").is_none());
    }

    #[test]
    fn catalog_entries_expose_tools_list_shape() {
        let cfg = config_with_tool();
        let entries = catalog_entries(&cfg.tools);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["name"], json!("forecast"));
        assert!(entries[0]["inputSchema"].is_object());
    }
}
