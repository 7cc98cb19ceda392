//! Error types for mcp-conformance
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling.
//!
//! The taxonomy mirrors the four fault classes a conformance client has to
//! keep apart:
//!
//! - transport faults (`McpTransport`, `TransportFault`, `NotStarted`,
//!   `ContainerRuntime`) -- the channel itself failed
//! - protocol faults (`Protocol`) -- the server answered with a JSON-RPC error
//! - negotiation faults (`Negotiation`, `ProtocolVersion`) -- the handshake
//!   produced something this client cannot work with
//! - async-operation faults (`AsyncTimeout`, `AsyncFailed`, `AsyncCancelled`)

use std::time::Duration;

use thiserror::Error;

use crate::mcp::types::JsonRpcError;

/// Main error type for mcp-conformance operations
#[derive(Error, Debug)]
pub enum ConformanceError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Low-level transport failure (spawn, pipe, HTTP connection)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// An operation that requires a running transport was attempted before
    /// `start()` or after `stop()`
    #[error("Transport not started")]
    NotStarted,

    /// A transport fault that was synthesized into a JSON-RPC error object
    /// (`-32000` transport error, `-32700` parse error)
    #[error("Transport fault: {0}")]
    TransportFault(JsonRpcError),

    /// The server answered with a JSON-RPC error object
    #[error("Protocol error: {0}")]
    Protocol(JsonRpcError),

    /// The `initialize` exchange produced an unusable response
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The server selected a protocol version this adapter does not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    ProtocolVersion {
        /// Versions the adapter accepts
        expected: Vec<String>,
        /// Version the server selected
        got: String,
    },

    /// An adapter operation was called in the wrong lifecycle state
    #[error("Invalid adapter state: {operation} requires {expected}, adapter is {actual}")]
    InvalidState {
        /// Operation that was attempted
        operation: String,
        /// State the operation requires
        expected: String,
        /// State the adapter was in
        actual: String,
    },

    /// An async operation did not reach a terminal status in time
    #[error("Async operation {operation_id} timed out after {elapsed:?}")]
    AsyncTimeout {
        /// Server-issued operation identifier
        operation_id: String,
        /// Time spent polling before giving up
        elapsed: Duration,
    },

    /// The server reported that an async operation failed
    #[error("Async operation {operation_id} failed: {error}")]
    AsyncFailed {
        /// Server-issued operation identifier
        operation_id: String,
        /// Error reported by the server
        error: JsonRpcError,
    },

    /// The async operation was cancelled before completion
    #[error("Async operation {0} was cancelled")]
    AsyncCancelled(String),

    /// The negotiated protocol version does not offer the requested feature
    #[error("Unsupported by protocol version {version}: {feature}")]
    Unsupported {
        /// Negotiated protocol version
        version: String,
        /// Feature that was requested
        feature: String,
    },

    /// Container runtime unreachable or a runtime command failed
    #[error("Container runtime error: {0}")]
    ContainerRuntime(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ConformanceError {
    /// Returns the JSON-RPC error code carried by this error, if any.
    ///
    /// Test assertions use this to check for specific codes without matching
    /// on every variant.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            ConformanceError::TransportFault(e) | ConformanceError::Protocol(e) => Some(e.code),
            ConformanceError::AsyncFailed { error, .. } => Some(error.code),
            _ => None,
        }
    }

    /// True for the fault classes the transport layer produces.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ConformanceError::McpTransport(_)
                | ConformanceError::TransportFault(_)
                | ConformanceError::NotStarted
                | ConformanceError::ContainerRuntime(_)
        )
    }
}

/// Result type alias for mcp-conformance operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation. Callers that
/// need to branch on the failure class downcast to [`ConformanceError`].
pub type Result<T> = anyhow::Result<T>;
