//! Model Context Protocol client machinery
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC primitives and the MCP payloads this client uses
//! - `framing`   -- id generation, line encoding, response parsing, batches
//! - `transport` -- `Transport` trait and the stdio, docker, and HTTP backends
//! - `protocol`  -- version adapters over any transport
//! - `server`    -- lifecycle harness pairing a transport with an adapter

pub mod framing;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;

pub use types::*;
