//! mcp-conformance - Conformance-testing client for MCP servers
//!
//! This library drives a Model Context Protocol server through connection,
//! version negotiation, capability exchange, tool invocation, asynchronous
//! operation completion, and shutdown.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: wire types, transports (stdio, docker, HTTP), protocol adapters,
//!   and the server harness
//! - `config`: Configuration management and validation
//! - `report`: Per-check records handed to reporting
//! - `commands`: CLI command handlers
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use mcp_conformance::{Config, ServerHarness};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.server.stdio.command = "python3 server.py".to_string();
//!     config.validate()?;
//!
//!     let harness = ServerHarness::from_config(&config)?;
//!     harness.start().await?;
//!     let tools = harness.adapter().list_tools().await?;
//!     println!("{} tools", tools.len());
//!     harness.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod report;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConformanceError, Result};
pub use mcp::framing::RpcOutcome;
pub use mcp::protocol::{AdapterState, ProtocolAdapter, ProtocolOptions};
pub use mcp::server::ServerHarness;
pub use mcp::transport::{Transport, TransportKind, TransportState};
pub use report::{TestRecord, TestStatus};
