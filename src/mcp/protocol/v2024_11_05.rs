//! Adapter for protocol revision `2024-11-05`
//!
//! This revision has no asynchronous tool calls: every invocation is a plain
//! request whose response carries the tool result. `cancel` is rejected as
//! unsupported.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{ConformanceError, Result};
use crate::mcp::protocol::{AdapterCore, ProtocolAdapter, ProtocolOptions};
use crate::mcp::transport::Transport;
use crate::mcp::types::PROTOCOL_VERSION_2024_11_05;

/// Speaks `2024-11-05`.
#[derive(Debug)]
pub struct Mcp20241105Adapter {
    core: AdapterCore,
}

impl Mcp20241105Adapter {
    /// Adapter over `transport`.
    pub fn new(transport: Arc<dyn Transport>, options: ProtocolOptions) -> Self {
        Self {
            core: AdapterCore::new(transport, PROTOCOL_VERSION_2024_11_05, options),
        }
    }
}

#[async_trait::async_trait]
impl ProtocolAdapter for Mcp20241105Adapter {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn supports_async(&self) -> bool {
        false
    }

    async fn invoke_tool(&self, name: &str, params: Value) -> Result<Value> {
        self.core.invoke_with_fallback(name, params).await
    }

    async fn cancel(&self, _operation_id: &str) -> Result<()> {
        Err(ConformanceError::Unsupported {
            version: PROTOCOL_VERSION_2024_11_05.to_string(),
            feature: "cancelling asynchronous tool operations".to_string(),
        }
        .into())
    }
}
