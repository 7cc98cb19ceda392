//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every channel to a server
//! under test must satisfy. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and exchanges
//!   newline-delimited JSON over its stdin/stdout pipes.
//! - [`docker::DockerTransport`] -- the stdio transport whose child is a
//!   container-runtime invocation, plus network/image/mount preparation,
//!   log retrieval, and container teardown.
//! - [`http::HttpTransport`] -- JSON-RPC over HTTP POST with a server-assigned
//!   session token.
//! - `fake::ScriptedTransport` -- in-process fake used in unit tests.
//!
//! # Design
//!
//! The contract is four operations -- `start`, `stop`, `send_request`,
//! `send_notification` -- plus batch submission. All three backends behave
//! identically from the caller's perspective:
//!
//! - `start()` on a running transport is a no-op.
//! - `stop()` is safe in any state and on repeated calls.
//! - `send_request()` never fails with a raw I/O error: transport faults are
//!   converted into a [`RpcOutcome::TransportFault`] carrying a synthesized
//!   JSON-RPC error.
//!
//! Process and container handles never leave the transport that created them;
//! [`Transport::is_alive`] is the only signal exposed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mcp::framing::RpcOutcome;
use crate::mcp::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Constructed, never started.
    Unstarted,
    /// Channel open; requests may be sent.
    Running,
    /// Resources released.
    Stopped,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Unstarted => write!(f, "unstarted"),
            TransportState::Running => write!(f, "running"),
            TransportState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lock-free holder for a [`TransportState`], readable from sync code.
#[derive(Debug)]
pub(crate) struct StateCell(std::sync::atomic::AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(std::sync::atomic::AtomicU8::new(0))
    }

    pub(crate) fn get(&self) -> TransportState {
        match self.0.load(std::sync::atomic::Ordering::SeqCst) {
            0 => TransportState::Unstarted,
            1 => TransportState::Running,
            _ => TransportState::Stopped,
        }
    }

    pub(crate) fn set(&self, state: TransportState) {
        let raw = match state {
            TransportState::Unstarted => 0,
            TransportState::Running => 1,
            TransportState::Stopped => 2,
        };
        self.0.store(raw, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Which backend a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local subprocess over stdio.
    #[default]
    Stdio,
    /// Subprocess inside a container runtime.
    Docker,
    /// HTTP endpoint.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Docker => write!(f, "docker"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "docker" | "container" => Ok(TransportKind::Docker),
            "http" => Ok(TransportKind::Http),
            other => Err(format!(
                "unknown transport `{}` (expected stdio, docker, or http)",
                other
            )),
        }
    }
}

/// A channel to one server under test.
///
/// Implementations use interior mutability so a transport can be shared as
/// `Arc<dyn Transport>` between an adapter and whatever drives it.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Which backend this is.
    fn kind(&self) -> TransportKind;

    /// Current lifecycle state.
    fn state(&self) -> TransportState;

    /// Acquire the underlying resource and move to [`TransportState::Running`].
    ///
    /// Idempotent while running. A stopped transport may be started again.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ConformanceError::McpTransport`] or
    /// [`crate::error::ConformanceError::ContainerRuntime`] if the resource
    /// cannot be acquired. The transport does not retry on its own.
    async fn start(&self) -> Result<()>;

    /// Release the underlying resource and move to [`TransportState::Stopped`].
    ///
    /// Performs a best-effort `shutdown` request / `exit` notification
    /// handshake, waits a bounded time, then force-terminates. Succeeds for a
    /// transport that was never started and on repeated calls.
    async fn stop(&self) -> Result<()>;

    /// Send one request and wait for the response carrying the same id.
    ///
    /// Never fails with a raw error; transport failures arrive as
    /// [`RpcOutcome::TransportFault`].
    async fn send_request(&self, request: JsonRpcRequest) -> RpcOutcome;

    /// Send one notification. No response is read.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ConformanceError::NotStarted`] when not running
    /// and [`crate::error::ConformanceError::McpTransport`] if the write fails
    /// after retries.
    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Send a batch as one unit and return the reply elements.
    ///
    /// The reply order is the server's; correlate with
    /// [`crate::mcp::framing::correlate_batch`].
    async fn send_batch(&self, batch: Vec<JsonRpcMessage>) -> Vec<RpcOutcome>;

    /// Whether the underlying process/container/connection is usable.
    async fn is_alive(&self) -> bool;

    /// Next request id from this transport's counter.
    fn next_id(&self) -> RequestId;

    /// Build a request with the next id and send it.
    async fn call(&self, method: &str, params: serde_json::Value) -> RpcOutcome {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        self.send_request(request).await
    }
}

pub mod docker;
pub mod http;
pub mod stderr;
pub mod stdio;

#[cfg(test)]
pub mod fake;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parses_aliases() {
        assert_eq!("STDIO".parse::<TransportKind>(), Ok(TransportKind::Stdio));
        assert_eq!(
            "container".parse::<TransportKind>(),
            Ok(TransportKind::Docker)
        );
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(TransportState::Unstarted.to_string(), "unstarted");
        assert_eq!(TransportState::Stopped.to_string(), "stopped");
    }
}
