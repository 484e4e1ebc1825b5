//! MCP payload types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// `tools/list` result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// List of tools
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Next cursor for pagination
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `tools/call` request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(default)]
    pub arguments: Value,
}

/// Implementation info exchanged during `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// Name
    pub name: String,
    /// Version
    pub version: String,
}

/// `initialize` request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities (none advertised)
    pub capabilities: Value,
    /// Client info
    #[serde(rename = "clientInfo")]
    pub client_info: Info,
}

impl InitializeParams {
    /// Handshake params identifying this agent
    #[must_use]
    pub fn for_agent() -> Self {
        Self {
            protocol_version: super::PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(serde_json::Map::new()),
            client_info: Info {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tools_list_parses_without_optional_fields() {
        let result: ToolsListResult = serde_json::from_value(json!({
            "tools": [{"name": "search_contacts"}]
        }))
        .unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "search_contacts");
        assert!(result.tools[0].description.is_none());
        assert!(result.next_cursor.is_none());
    }

    #[test]
    fn initialize_params_wire_names() {
        let value = serde_json::to_value(InitializeParams::for_agent()).unwrap();
        assert_eq!(value["protocolVersion"], "2024-11-05");
        assert_eq!(value["capabilities"], json!({}));
        assert_eq!(value["clientInfo"]["name"], "mission-control");
    }
}
