//! MCP tool descriptors and vendor-neutral call/result shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by an MCP server, in vendor-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_name: Option<String>,
}

/// A tool invocation extracted from a vendor response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Result of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolResult {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub is_error: bool,
    pub content: Value,
}

impl McpToolResult {
    #[must_use]
    pub fn success(call: &McpToolCall, content: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            is_error: false,
            content,
        }
    }

    #[must_use]
    pub fn error(call: &McpToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            is_error: true,
            content: Value::String(message.into()),
        }
    }
}

/// Built-in tool names that produce a citation block alongside their tool
/// block when they complete.
pub const BUILTIN_WEB_SEARCH_TOOL: &str = "builtin_web_search";
pub const BUILTIN_KNOWLEDGE_SEARCH_TOOL: &str = "builtin_knowledge_search";

#[must_use]
pub fn is_citation_producing_tool(name: &str) -> bool {
    name == BUILTIN_WEB_SEARCH_TOOL || name == BUILTIN_KNOWLEDGE_SEARCH_TOOL
}
