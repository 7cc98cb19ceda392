//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire types this conformance client exchanges with
//! a server under test. Two dated protocol revisions are supported:
//! **2024-11-05** and **2025-03-26**. Struct fields are `camelCase` on the wire
//! via `#[serde(rename_all = "camelCase")]`. Capability sets are kept as raw
//! [`serde_json::Value`] maps because a conformance client must not assume any
//! capability key is present.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Protocol version constants
// ---------------------------------------------------------------------------

/// The first dated protocol revision.
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";

/// The revision that introduced asynchronous tool calls.
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";

/// The most recent supported protocol revision.
pub const LATEST_PROTOCOL_VERSION: &str = PROTOCOL_VERSION_2025_03_26;

/// All protocol versions this client can drive, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[PROTOCOL_VERSION_2025_03_26, PROTOCOL_VERSION_2024_11_05];

/// JSON-RPC protocol tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Method constants
// ---------------------------------------------------------------------------

/// Lifecycle: client sends `initialize` to open a session.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Lifecycle: client sends `notifications/initialized` after the server ACKs.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Lifecycle: orderly shutdown request.
pub const METHOD_SHUTDOWN: &str = "shutdown";
/// Lifecycle: final exit notification.
pub const METHOD_EXIT: &str = "exit";
/// Keepalive ping.
pub const METHOD_PING: &str = "ping";
/// Request a page of available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool through the generic dispatcher.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Poll the status of an asynchronous tool call (2025-03-26).
pub const METHOD_TOOLS_RESULT: &str = "tools/result";
/// Stop tracking an asynchronous tool call (2025-03-26).
pub const METHOD_TOOLS_CANCEL: &str = "tools/cancel";
/// Request a page of available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
/// Read the contents of a resource by URI.
pub const METHOD_RESOURCES_READ: &str = "resources/read";
/// Request a page of available prompts.
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
/// Retrieve a rendered prompt by name.
pub const METHOD_PROMPTS_GET: &str = "prompts/get";

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Locally synthesized transport failure.
pub const TRANSPORT_ERROR: i64 = -32000;

// ---------------------------------------------------------------------------
// Transport-level names
// ---------------------------------------------------------------------------

/// Session header, written in canonical case; matched case-insensitively on read.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";
/// Protocol version header, attached for the newest protocol version only.
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
/// Environment variable carrying the protocol version into a child server.
pub const ENV_PROTOCOL_VERSION: &str = "MCP_PROTOCOL_VERSION";
/// Environment variable carrying the debug flag into a child server.
pub const ENV_DEBUG: &str = "MCP_DEBUG";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC request identifier.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::types::RequestId;
///
/// let id: RequestId = serde_json::from_str("\"t1\"").unwrap();
/// assert_eq!(id, RequestId::from("t1"));
/// let id: RequestId = serde_json::from_str("7").unwrap();
/// assert_eq!(id, RequestId::Number(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer identifier.
    Number(i64),
    /// String identifier.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// A JSON-RPC 2.0 request object.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new("t1", "ping", serde_json::json!({}));
/// let json = serde_json::to_value(&req).unwrap();
/// assert_eq!(json["jsonrpc"], "2.0");
/// assert_eq!(json["id"], "t1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol tag; always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation identifier.
    pub id: RequestId,
    /// The method name to invoke.
    pub method: String,
    /// Method parameters; omitted from the wire when `null`.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    /// Build a request with the given id, method, and params.
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (a request with no `id`).
///
/// The server MUST NOT reply to a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol tag; always `"2.0"`.
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Notification parameters; omitted from the wire when `null`.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl JsonRpcNotification {
    /// Build a notification with the given method and params.
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// One element of an outbound batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification expecting nothing.
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// The request id, or `None` for a notification.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.id),
            JsonRpcMessage::Notification(_) => None,
        }
    }

    /// The method name.
    pub fn method(&self) -> &str {
        match self {
            JsonRpcMessage::Request(r) => &r.method,
            JsonRpcMessage::Notification(n) => &n.method,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(r)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(n)
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Exactly one of `result` or `error` is present in a valid response. `id` is
/// `None` only when the server could not determine the request id (for example
/// a parse error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol tag; always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the `id` of the originating request.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Successful result value; mutually exclusive with `error`.
    ///
    /// A present `"result": null` is `Some(Value::Null)`; only an absent
    /// member is `None`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: Option<RequestId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC 2.0 error object.
///
/// Implements `Display` as `"JSON-RPC error {code}: {message}"`.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError::new(-32600, "Invalid Request");
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code as defined by JSON-RPC 2.0 or MCP.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Build an error object without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a `data` payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// True when the server reported `-32601 Method not found`.
    pub fn is_method_not_found(&self) -> bool {
        self.code == METHOD_NOT_FOUND
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle types
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Version string.
    pub version: String,
}

impl Implementation {
    /// Identity this crate reports in `clientInfo`.
    pub fn this_client() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by the client.
    pub capabilities: serde_json::Value,
    /// Identity of the client implementation.
    pub client_info: Implementation,
}

/// What the client recorded from a successful `initialize` response.
///
/// Immutable for the remainder of the channel's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// The protocol version the server selected.
    pub protocol_version: String,
    /// Capabilities advertised by the server.
    pub capabilities: serde_json::Value,
    /// Identity of the server implementation.
    pub server_info: Implementation,
    /// Optional usage hints from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Tool, resource, and prompt types
// ---------------------------------------------------------------------------

/// A tool exposed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's arguments.
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Cursor parameter shared by every paginated list method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedParams {
    /// Opaque cursor from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Response to a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    /// One page of tools.
    #[serde(default)]
    pub tools: Vec<McpTool>,
    /// Cursor for the next page, absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// A resource exposed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Canonical resource URI.
    pub uri: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// MIME type, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Response to a `resources/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResponse {
    /// One page of resources.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// URI to read.
    pub uri: String,
}

/// Response to `resources/read`. Content items are kept raw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResponse {
    /// Content items.
    #[serde(default)]
    pub contents: Vec<serde_json::Value>,
}

/// A prompt template exposed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Response to a `prompts/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResponse {
    /// One page of prompts.
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters for `prompts/get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Prompt name.
    pub name: String,
    /// Template arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Async operation types (2025-03-26)
// ---------------------------------------------------------------------------

/// Handle returned by a tool call that completes asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationHandle {
    /// Server-issued operation identifier.
    pub operation_id: String,
}

/// Lifecycle state of an asynchronous operation.
///
/// `Submitted` and `TimedOut` are client-side states: the former before the
/// first poll, the latter when the client gives up waiting.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::types::OperationStatus;
///
/// let s: OperationStatus = serde_json::from_str("\"running\"").unwrap();
/// assert_eq!(s, OperationStatus::Running);
/// assert!(!s.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Accepted by the server, not yet polled.
    Submitted,
    /// Still in progress.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by the client or server.
    Cancelled,
    /// The client stopped waiting.
    TimedOut,
}

impl OperationStatus {
    /// True once the operation can no longer change state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Submitted | OperationStatus::Running)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Submitted => "submitted",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Body of a `tools/result` poll response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatusResponse {
    /// Current server-side status.
    pub status: OperationStatus,
    /// Final result when `status == completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure detail when `status == failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}
