//! Adapter for protocol revision `2025-03-26`
//!
//! Adds asynchronous tool calls on top of the shared core. They are used only
//! when both sides advertised `capabilities.tools.asyncSupported == true`
//! during `initialize`; otherwise tools are invoked exactly as under
//! `2024-11-05`.
//!
//! With async negotiated, outgoing tool params are tagged `"async": true`. A
//! result carrying an `operationId` is polled to completion through
//! [`operations::poll_until_terminal`]; any other result is returned as is.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::mcp::protocol::operations::{self, PollSettings};
use crate::mcp::protocol::{capability_flag, AdapterCore, ProtocolAdapter, ProtocolOptions};
use crate::mcp::transport::Transport;
use crate::mcp::types::PROTOCOL_VERSION_2025_03_26;

/// Speaks `2025-03-26`.
#[derive(Debug)]
pub struct Mcp20250326Adapter {
    core: AdapterCore,
}

impl Mcp20250326Adapter {
    /// Adapter over `transport`.
    pub fn new(transport: Arc<dyn Transport>, options: ProtocolOptions) -> Self {
        Self {
            core: AdapterCore::new(transport, PROTOCOL_VERSION_2025_03_26, options),
        }
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.core.options().poll_interval,
            timeout: self.core.options().async_timeout,
        }
    }
}

#[async_trait::async_trait]
impl ProtocolAdapter for Mcp20250326Adapter {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    fn supports_async(&self) -> bool {
        let server = match self.core.negotiated() {
            Some(n) => n.capabilities,
            None => return false,
        };
        capability_flag(&self.core.client_capabilities(), "tools", "asyncSupported")
            && capability_flag(&server, "tools", "asyncSupported")
    }

    async fn invoke_tool(&self, name: &str, params: Value) -> Result<Value> {
        if !self.supports_async() {
            return self.core.invoke_with_fallback(name, params).await;
        }

        let result = self
            .core
            .invoke_with_fallback(name, operations::tag_async(params))
            .await?;
        match operations::operation_handle(&result) {
            Some(handle) => {
                tracing::debug!(
                    target: "mcp_conformance::mcp::protocol",
                    tool = name,
                    operation_id = %handle.operation_id,
                    "tool call deferred"
                );
                let transport = self.core.transport();
                operations::poll_until_terminal(
                    transport.as_ref(),
                    self.core.operations(),
                    &handle.operation_id,
                    self.poll_settings(),
                )
                .await
            }
            None => Ok(result),
        }
    }

    async fn cancel(&self, operation_id: &str) -> Result<()> {
        let transport = self.core.transport();
        operations::cancel_operation(transport.as_ref(), self.core.operations(), operation_id).await
    }
}
