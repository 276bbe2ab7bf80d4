//! Payload types for the handshake, listing and invocation methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `initialize` method name.
pub const METHOD_INITIALIZE: &str = "initialize";
/// `notifications/initialized` method name.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// `tools/list` method name.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// `tools/call` method name.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// `clientInfo` / `serverInfo` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

/// `initialize` parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Advertised protocol version.
    pub protocol_version: String,
    /// Client capabilities (the harness advertises none).
    pub capabilities: Value,
    /// Client identity.
    pub client_info: Implementation,
}

/// `initialize` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Version the server agreed to.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server capabilities, uninterpreted.
    #[serde(default)]
    pub capabilities: Value,
    /// Server identity.
    pub server_info: Implementation,
}

/// One entry of `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default)]
    pub description: String,
    /// Argument schema, uninterpreted.
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// `tools/list` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolsListResult {
    /// Tools in server order.
    pub tools: Vec<ToolDescriptor>,
}

/// `tools/call` parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    pub arguments: Value,
}

/// One wire content item of a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireContent {
    /// Content type tag (usually `text`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Text body, absent for non-text content.
    #[serde(default)]
    pub text: Option<String>,
}

/// `tools/call` result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Ordered content items.
    pub content: Vec<WireContent>,
    /// Tool-level failure flag.
    #[serde(default)]
    pub is_error: Option<bool>,
}
