//! Protocol-version adapters
//!
//! A [`ProtocolAdapter`] drives one server through one dated revision of the
//! MCP protocol on top of any [`Transport`]. Two revisions are implemented:
//!
//! - [`v2024_11_05::Mcp20241105Adapter`] -- synchronous tool calls only
//! - [`v2025_03_26::Mcp20250326Adapter`] -- adds asynchronous tool calls,
//!   polled through `tools/result` and cancelled through `tools/cancel`
//!
//! Both are thin shells over [`AdapterCore`], which owns the lifecycle state
//! machine, the negotiated record, the compliance-warning log, and the
//! operations every revision shares. Use [`adapter_for_version`] to pick one
//! at run time.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> ShuttingDown -> Closed
//!       ^               |
//!       +---- failure --+
//! ```
//!
//! A failed `initialize` returns to `Uninitialized`, except when the adapter
//! was already `Ready`: the earlier negotiated record and `Ready` state are
//! kept.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ConformanceError, Result};
use crate::mcp::framing::RpcOutcome;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, GetPromptParams, Implementation, InitializeParams, InitializeResult,
    JsonRpcNotification, ListPromptsResponse, ListResourcesResponse, ListToolsResponse, McpTool,
    PaginatedParams, Prompt, ReadResourceParams, ReadResourceResponse, Resource,
    METHOD_EXIT, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_PROMPTS_GET,
    METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_SHUTDOWN,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PROTOCOL_VERSION_2024_11_05,
    PROTOCOL_VERSION_2025_03_26, SUPPORTED_PROTOCOL_VERSIONS,
};

pub mod operations;
pub mod v2024_11_05;
pub mod v2025_03_26;

pub use v2024_11_05::Mcp20241105Adapter;
pub use v2025_03_26::Mcp20250326Adapter;

use operations::OperationTracker;

const LOG_TARGET: &str = "mcp_conformance::mcp::protocol";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Public value types
// ---------------------------------------------------------------------------

/// Lifecycle state of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// No successful `initialize` yet.
    Uninitialized,
    /// `initialize` is in flight.
    Initializing,
    /// Negotiated; operations may be issued.
    Ready,
    /// `shutdown` has been sent.
    ShuttingDown,
    /// `exit` has been sent; nothing further is possible.
    Closed,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Uninitialized => "uninitialized",
            AdapterState::Initializing => "initializing",
            AdapterState::Ready => "ready",
            AdapterState::ShuttingDown => "shutting_down",
            AdapterState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A deviation from the protocol that the client worked around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceWarning {
    /// Tool the caller asked for.
    pub tool: String,
    /// Method name that was tried instead.
    pub attempted_method: String,
    /// Human-readable description.
    pub message: String,
}

/// Knobs shared by every adapter.
#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    /// Identity sent as `clientInfo`.
    pub client_info: Implementation,
    /// Pause between `tools/result` polls.
    pub poll_interval: Duration,
    /// How long an async tool call may run before the client gives up.
    pub async_timeout: Duration,
    /// Retry `-32601` tool invocations under alternative method names.
    pub fallback_probing: bool,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            client_info: Implementation::this_client(),
            poll_interval: Duration::from_millis(500),
            async_timeout: Duration::from_secs(60),
            fallback_probing: false,
        }
    }
}

/// Alternative method names tried for `tool` when fallback probing is on.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::protocol::fallback_methods;
///
/// assert_eq!(
///     fallback_methods("fs_read"),
///     vec!["tools/fs_read", "tools.fs_read", "tool/fs_read"]
/// );
/// ```
pub fn fallback_methods(tool: &str) -> Vec<String> {
    vec![
        format!("tools/{}", tool),
        format!("tools.{}", tool),
        format!("tool/{}", tool),
    ]
}

/// Whether `capabilities.<section>.<flag>` is literally `true`.
pub fn capability_flag(capabilities: &Value, section: &str, flag: &str) -> bool {
    capabilities
        .get(section)
        .and_then(|s| s.get(flag))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// One protocol revision spoken over one transport.
///
/// Every operation except the version-specific ones has a default
/// implementation in terms of [`ProtocolAdapter::core`].
#[async_trait::async_trait]
pub trait ProtocolAdapter: Send + Sync + fmt::Debug {
    /// Shared state and operations.
    fn core(&self) -> &AdapterCore;

    /// Whether asynchronous tool calls were negotiated on both sides.
    fn supports_async(&self) -> bool;

    /// Perform the `initialize` exchange and record the negotiated result.
    ///
    /// # Errors
    ///
    /// - [`ConformanceError::Protocol`] if the server answered with an error
    /// - [`ConformanceError::TransportFault`] if no answer arrived
    /// - [`ConformanceError::Negotiation`] if a required field is missing
    /// - [`ConformanceError::ProtocolVersion`] if the server chose a version
    ///   this adapter does not speak
    /// - [`ConformanceError::InvalidState`] once shutdown has begun
    async fn initialize(&self, client_capabilities: Value) -> Result<InitializeResult> {
        self.core().initialize(client_capabilities).await
    }

    /// Invoke a tool by using its name as the JSON-RPC method.
    async fn invoke_tool(&self, name: &str, params: Value) -> Result<Value>;

    /// Cancel an in-flight asynchronous operation.
    async fn cancel(&self, operation_id: &str) -> Result<()>;

    /// Protocol version this adapter speaks.
    fn protocol_version(&self) -> &'static str {
        self.core().version()
    }

    /// Current lifecycle state.
    fn state(&self) -> AdapterState {
        self.core().state()
    }

    /// The record from the first successful `initialize`.
    fn negotiated(&self) -> Option<InitializeResult> {
        self.core().negotiated()
    }

    /// Workarounds applied so far.
    fn compliance_warnings(&self) -> Vec<ComplianceWarning> {
        self.core().compliance_warnings()
    }

    /// The transport this adapter drives.
    fn transport(&self) -> Arc<dyn Transport> {
        self.core().transport()
    }

    /// Send `notifications/initialized`. Only valid in `Ready`.
    async fn send_initialized(&self) -> Result<()> {
        self.core().send_initialized().await
    }

    /// Send `shutdown`. A no-op once shutdown has begun.
    async fn shutdown(&self) -> Result<()> {
        self.core().shutdown().await
    }

    /// Send `exit`. A no-op once `Closed`.
    async fn exit(&self) -> Result<()> {
        self.core().exit().await
    }

    /// Round-trip a `ping`.
    async fn ping(&self) -> Result<()> {
        self.core().ping().await
    }

    /// Every tool the server lists, following pagination.
    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.core().list_tools().await
    }

    /// `tools/call` with `name` and optional arguments.
    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        self.core().call_tool(name, arguments).await
    }

    /// Every resource the server lists, following pagination.
    async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.core().list_resources().await
    }

    /// Content items of resource `uri`.
    async fn read_resource(&self, uri: &str) -> Result<Vec<Value>> {
        self.core().read_resource(uri).await
    }

    /// Every prompt the server lists, following pagination.
    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.core().list_prompts().await
    }

    /// Expand prompt `name`.
    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        self.core().get_prompt(name, arguments).await
    }
}

/// Build the adapter for `version`.
///
/// # Errors
///
/// Returns [`ConformanceError::ProtocolVersion`] for a version no adapter
/// speaks.
pub fn adapter_for_version(
    version: &str,
    transport: Arc<dyn Transport>,
    options: ProtocolOptions,
) -> Result<Arc<dyn ProtocolAdapter>> {
    match version {
        PROTOCOL_VERSION_2024_11_05 => Ok(Arc::new(Mcp20241105Adapter::new(transport, options))),
        PROTOCOL_VERSION_2025_03_26 => Ok(Arc::new(Mcp20250326Adapter::new(transport, options))),
        other => Err(ConformanceError::ProtocolVersion {
            expected: SUPPORTED_PROTOCOL_VERSIONS.iter().map(|s| s.to_string()).collect(),
            got: other.to_string(),
        }
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Shared core
// ---------------------------------------------------------------------------

/// State and operations common to every protocol revision.
#[derive(Debug)]
pub struct AdapterCore {
    transport: Arc<dyn Transport>,
    version: &'static str,
    options: ProtocolOptions,
    state: Mutex<AdapterState>,
    negotiated: Mutex<Option<InitializeResult>>,
    client_capabilities: Mutex<Value>,
    warnings: Mutex<Vec<ComplianceWarning>>,
    operations: OperationTracker,
}

impl AdapterCore {
    /// Core for `version` over `transport`.
    pub fn new(transport: Arc<dyn Transport>, version: &'static str, options: ProtocolOptions) -> Self {
        Self {
            transport,
            version,
            options,
            state: Mutex::new(AdapterState::Uninitialized),
            negotiated: Mutex::new(None),
            client_capabilities: Mutex::new(json!({})),
            warnings: Mutex::new(Vec::new()),
            operations: OperationTracker::default(),
        }
    }

    /// Protocol version.
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Options this core was built with.
    pub fn options(&self) -> &ProtocolOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        *lock(&self.state)
    }

    fn set_state(&self, state: AdapterState) {
        let mut current = lock(&self.state);
        if *current != state {
            tracing::debug!(target: LOG_TARGET, version = self.version, "adapter {} -> {}", *current, state);
            *current = state;
        }
    }

    /// The negotiated record.
    pub fn negotiated(&self) -> Option<InitializeResult> {
        lock(&self.negotiated).clone()
    }

    /// Capabilities sent in the last `initialize`.
    pub fn client_capabilities(&self) -> Value {
        lock(&self.client_capabilities).clone()
    }

    /// Workarounds recorded so far.
    pub fn compliance_warnings(&self) -> Vec<ComplianceWarning> {
        lock(&self.warnings).clone()
    }

    /// Shared transport handle.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Tracker of in-flight async operations.
    pub fn operations(&self) -> &OperationTracker {
        &self.operations
    }

    fn require_state(&self, operation: &str, allowed: &[AdapterState]) -> Result<()> {
        let actual = self.state();
        if allowed.contains(&actual) {
            return Ok(());
        }
        Err(ConformanceError::InvalidState {
            operation: operation.to_string(),
            expected: allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" or "),
            actual: actual.to_string(),
        }
        .into())
    }

    fn require_ready(&self, operation: &str) -> Result<()> {
        self.require_state(operation, &[AdapterState::Ready])
    }

    /// Send `method` and return its `result`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.transport.call(method, params).await.into_result()
    }

    async fn request_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R> {
        let value = self.request(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(value).map_err(ConformanceError::Serialization)?)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Shared `initialize` implementation; see [`ProtocolAdapter::initialize`].
    pub async fn initialize(&self, client_capabilities: Value) -> Result<InitializeResult> {
        let prior = self.state();
        self.require_state(
            METHOD_INITIALIZE,
            &[AdapterState::Uninitialized, AdapterState::Ready],
        )?;
        self.set_state(AdapterState::Initializing);

        let params = InitializeParams {
            protocol_version: self.version.to_string(),
            capabilities: client_capabilities.clone(),
            client_info: self.options.client_info.clone(),
        };

        let outcome = match serde_json::to_value(&params) {
            Ok(p) => self.request(METHOD_INITIALIZE, p).await,
            Err(e) => Err(ConformanceError::Serialization(e).into()),
        };
        let negotiated = outcome.and_then(|result| self.validate_initialize(result));

        match negotiated {
            Ok(result) => {
                if prior == AdapterState::Ready {
                    tracing::info!(
                        target: LOG_TARGET,
                        "repeated initialize succeeded; keeping first negotiated record"
                    );
                } else {
                    tracing::info!(
                        target: LOG_TARGET,
                        version = %result.protocol_version,
                        server = %result.server_info.name,
                        server_version = %result.server_info.version,
                        "initialized MCP session"
                    );
                    *lock(&self.negotiated) = Some(result.clone());
                    *lock(&self.client_capabilities) = client_capabilities;
                }
                self.set_state(AdapterState::Ready);
                Ok(result)
            }
            Err(e) => {
                let fallback = if prior == AdapterState::Ready {
                    AdapterState::Ready
                } else {
                    AdapterState::Uninitialized
                };
                tracing::warn!(target: LOG_TARGET, "initialize failed: {}", e);
                self.set_state(fallback);
                Err(e)
            }
        }
    }

    fn validate_initialize(&self, result: Value) -> Result<InitializeResult> {
        let version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConformanceError::Negotiation("initialize result lacks protocolVersion".into())
            })?;
        if !result.get("capabilities").map(Value::is_object).unwrap_or(false) {
            return Err(ConformanceError::Negotiation(
                "initialize result lacks a capabilities object".into(),
            )
            .into());
        }
        if result.get("serverInfo").is_none() {
            return Err(
                ConformanceError::Negotiation("initialize result lacks serverInfo".into()).into(),
            );
        }
        if version != self.version {
            return Err(ConformanceError::ProtocolVersion {
                expected: vec![self.version.to_string()],
                got: version.to_string(),
            }
            .into());
        }
        serde_json::from_value::<InitializeResult>(result).map_err(|e| {
            ConformanceError::Negotiation(format!("malformed initialize result: {}", e)).into()
        })
    }

    /// Send `notifications/initialized`.
    pub async fn send_initialized(&self) -> Result<()> {
        self.require_ready(METHOD_INITIALIZED)?;
        self.transport
            .send_notification(JsonRpcNotification::new(METHOD_INITIALIZED, json!({})))
            .await
    }

    /// Send `shutdown` unless shutdown already began.
    pub async fn shutdown(&self) -> Result<()> {
        if matches!(
            self.state(),
            AdapterState::ShuttingDown | AdapterState::Closed
        ) {
            return Ok(());
        }
        self.set_state(AdapterState::ShuttingDown);
        self.operations.clear();
        self.request(METHOD_SHUTDOWN, Value::Null).await.map(|_| ())
    }

    /// Send `exit` unless already closed.
    pub async fn exit(&self) -> Result<()> {
        if self.state() == AdapterState::Closed {
            return Ok(());
        }
        self.set_state(AdapterState::Closed);
        self.transport
            .send_notification(JsonRpcNotification::new(METHOD_EXIT, Value::Null))
            .await
    }

    // -- shared operations --------------------------------------------------

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.require_state(
            METHOD_PING,
            &[
                AdapterState::Uninitialized,
                AdapterState::Initializing,
                AdapterState::Ready,
            ],
        )?;
        self.request(METHOD_PING, json!({})).await.map(|_| ())
    }

    /// Invoke `name` as a bare method, probing alternatives on `-32601` when
    /// enabled.
    pub async fn invoke_with_fallback(&self, name: &str, params: Value) -> Result<Value> {
        self.require_ready(name)?;
        let first = self.transport.call(name, params.clone()).await;
        let original = match first {
            RpcOutcome::ProtocolError { ref error, .. }
                if error.is_method_not_found() && self.options.fallback_probing =>
            {
                error.clone()
            }
            other => return other.into_result(),
        };

        for method in fallback_methods(name) {
            let message = format!(
                "server rejected `{}` as an unknown method; retrying as `{}`",
                name, method
            );
            tracing::warn!(target: LOG_TARGET, tool = name, attempted = %method, "{}", message);
            lock(&self.warnings).push(ComplianceWarning {
                tool: name.to_string(),
                attempted_method: method.clone(),
                message,
            });
            match self.transport.call(&method, params.clone()).await {
                RpcOutcome::ProtocolError { error, .. } if error.is_method_not_found() => continue,
                other => return other.into_result(),
            }
        }
        Err(ConformanceError::Protocol(original).into())
    }

    async fn paginate<R, T>(
        &self,
        method: &str,
        split: impl Fn(R) -> (Vec<T>, Option<String>) + Send,
    ) -> Result<Vec<T>>
    where
        R: DeserializeOwned + Send,
        T: Send,
    {
        self.require_ready(method)?;
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let page: R = self
                .request_typed(method, PaginatedParams { cursor: cursor.clone() })
                .await?;
            let (batch, next) = split(page);
            items.extend(batch);
            match next {
                Some(c) if !c.is_empty() => {
                    if !seen.insert(c.clone()) {
                        tracing::warn!(target: LOG_TARGET, method, cursor = %c, "server repeated a pagination cursor");
                        break;
                    }
                    cursor = Some(c);
                }
                _ => break,
            }
        }
        Ok(items)
    }

    /// See [`ProtocolAdapter::list_tools`].
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.paginate(METHOD_TOOLS_LIST, |r: ListToolsResponse| (r.tools, r.next_cursor))
            .await
    }

    /// See [`ProtocolAdapter::call_tool`].
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        self.require_ready(METHOD_TOOLS_CALL)?;
        self.request_typed(
            METHOD_TOOLS_CALL,
            CallToolParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await
    }

    /// See [`ProtocolAdapter::list_resources`].
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.paginate(METHOD_RESOURCES_LIST, |r: ListResourcesResponse| {
            (r.resources, r.next_cursor)
        })
        .await
    }

    /// See [`ProtocolAdapter::read_resource`].
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>> {
        self.require_ready(METHOD_RESOURCES_READ)?;
        let resp: ReadResourceResponse = self
            .request_typed(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
            )
            .await?;
        Ok(resp.contents)
    }

    /// See [`ProtocolAdapter::list_prompts`].
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.paginate(METHOD_PROMPTS_LIST, |r: ListPromptsResponse| {
            (r.prompts, r.next_cursor)
        })
        .await
    }

    /// See [`ProtocolAdapter::get_prompt`].
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        self.require_ready(METHOD_PROMPTS_GET)?;
        self.request_typed(
            METHOD_PROMPTS_GET,
            GetPromptParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await
    }
}
