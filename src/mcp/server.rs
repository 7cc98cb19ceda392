//! Server-lifecycle harness
//!
//! [`ServerHarness`] turns a [`Config`] into a matched transport and protocol
//! adapter and runs the lifecycle around them:
//!
//! ```text
//! start():  transport.start -> initialize -> notifications/initialized
//! stop():   shutdown -> exit -> transport.stop
//! ```
//!
//! The harness owns both halves. Callers that need several servers build
//! several harnesses; nothing is shared between them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::Config;
use crate::error::Result;
use crate::mcp::protocol::{adapter_for_version, ProtocolAdapter, ProtocolOptions};
use crate::mcp::transport::docker::{ContainerRuntime, ContainerSpec, DockerTransport, MountSpec};
use crate::mcp::transport::http::{HttpSettings, HttpTransport};
use crate::mcp::transport::stdio::{ProcessSpec, StdioSettings, StdioTransport};
use crate::mcp::transport::{Transport, TransportKind, TransportState};
use crate::mcp::types::InitializeResult;

const LOG_TARGET: &str = "mcp_conformance::mcp::server";

/// Process-transport settings derived from `config`.
pub fn stdio_settings(config: &Config) -> StdioSettings {
    StdioSettings {
        request_timeout: Duration::from_secs(config.timeouts.request_seconds),
        write_retries: config.timeouts.write_retries,
        retry_delay: Duration::from_millis(config.timeouts.retry_delay_ms),
        shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_seconds),
        stderr_buffer_lines: config.timeouts.stderr_buffer_lines,
        protocol_version: Some(config.server.protocol_version.clone()),
        debug: config.server.debug,
    }
}

/// HTTP-transport settings derived from `config`.
pub fn http_settings(config: &Config) -> HttpSettings {
    HttpSettings {
        request_timeout: Duration::from_secs(config.timeouts.request_seconds),
        shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_seconds),
        protocol_version: config.server.protocol_version.clone(),
        headers: config.server.http.headers.clone(),
    }
}

/// Adapter options derived from `config`.
pub fn protocol_options(config: &Config) -> ProtocolOptions {
    ProtocolOptions {
        poll_interval: Duration::from_millis(config.client.poll_interval_ms),
        async_timeout: Duration::from_secs(config.client.async_timeout_seconds),
        fallback_probing: config.client.fallback_probing,
        ..ProtocolOptions::default()
    }
}

/// Build the unstarted transport `config` selects.
///
/// # Errors
///
/// Returns a configuration error when the server command cannot be split or
/// the HTTP endpoint is not a URL.
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let server = &config.server;
    let transport: Arc<dyn Transport> = match server.transport {
        TransportKind::Stdio => {
            let mut spec = ProcessSpec::from_command_line(&server.stdio.command)?;
            spec.env.extend(server.stdio.env.clone());
            if let Some(dir) = &server.stdio.working_dir {
                spec = spec.with_working_dir(dir.clone());
            }
            Arc::new(StdioTransport::new(spec, stdio_settings(config)))
        }
        TransportKind::Docker => {
            let docker = &server.docker;
            let runtime = ContainerRuntime {
                binary: docker.runtime.clone(),
                probe_timeout: Duration::from_secs(config.timeouts.runtime_probe_seconds),
                command_timeout: Duration::from_secs(config.timeouts.runtime_command_seconds),
            };
            let mut container = ContainerSpec::new(docker.image.clone());
            container.args = docker.args.clone();
            container.network = docker.network.clone();
            container.mount = docker.mount_host.as_ref().map(|host| MountSpec {
                host: host.clone(),
                container: docker.mount_target.clone(),
            });
            container.env = docker.env.clone();
            container.name_prefix = docker.name_prefix.clone();
            container.pull = docker.pull;
            Arc::new(DockerTransport::new(
                runtime,
                container,
                stdio_settings(config),
                server.protocol_version.clone(),
            ))
        }
        TransportKind::Http => {
            let endpoint = url::Url::parse(&server.http.url).map_err(|e| {
                crate::error::ConformanceError::Config(format!(
                    "invalid HTTP endpoint `{}`: {}",
                    server.http.url, e
                ))
            })?;
            Arc::new(HttpTransport::new(endpoint, http_settings(config))?)
        }
    };
    Ok(transport)
}

/// A transport and its adapter, driven through the lifecycle together.
#[derive(Debug)]
pub struct ServerHarness {
    transport: Arc<dyn Transport>,
    adapter: Arc<dyn ProtocolAdapter>,
    client_capabilities: Value,
}

impl ServerHarness {
    /// Build the transport and adapter `config` describes. Nothing is
    /// started yet.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unusable transport description
    /// or a protocol version no adapter speaks.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = build_transport(config)?;
        let adapter = adapter_for_version(
            &config.server.protocol_version,
            Arc::clone(&transport),
            protocol_options(config),
        )?;
        Ok(Self::new(transport, adapter, config.client.capabilities.clone()))
    }

    /// Pair an existing transport and adapter.
    pub fn new(
        transport: Arc<dyn Transport>,
        adapter: Arc<dyn ProtocolAdapter>,
        client_capabilities: Value,
    ) -> Self {
        Self {
            transport,
            adapter,
            client_capabilities,
        }
    }

    /// The protocol adapter.
    pub fn adapter(&self) -> &Arc<dyn ProtocolAdapter> {
        &self.adapter
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Start the transport, negotiate, and announce readiness.
    ///
    /// If negotiation or the `initialized` notification fails, the transport
    /// is stopped again before the error is returned.
    ///
    /// # Errors
    ///
    /// Propagates transport start failures and `initialize` errors.
    pub async fn start(&self) -> Result<InitializeResult> {
        self.transport.start().await?;
        let negotiated = match self.adapter.initialize(self.client_capabilities.clone()).await {
            Ok(n) => n,
            Err(e) => {
                self.abandon_start("initialize").await;
                return Err(e);
            }
        };
        if let Err(e) = self.adapter.send_initialized().await {
            self.abandon_start("initialized").await;
            return Err(e);
        }
        tracing::info!(
            target: LOG_TARGET,
            transport = %self.transport.kind(),
            version = self.adapter.protocol_version(),
            "server ready"
        );
        Ok(negotiated)
    }

    async fn abandon_start(&self, step: &str) {
        if let Err(e) = self.transport.stop().await {
            tracing::warn!(target: LOG_TARGET, "stop after failed {}: {}", step, e);
        }
    }

    /// Shut the session down and release the transport.
    ///
    /// Protocol-level failures during shutdown are logged, not returned;
    /// the transport is always stopped. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns only errors from releasing the transport itself.
    pub async fn stop(&self) -> Result<()> {
        if self.transport.state() == TransportState::Running {
            if let Err(e) = self.adapter.shutdown().await {
                tracing::warn!(target: LOG_TARGET, "shutdown request failed: {}", e);
            }
            if let Err(e) = self.adapter.exit().await {
                tracing::warn!(target: LOG_TARGET, "exit notification failed: {}", e);
            }
        }
        self.transport.stop().await
    }
}
