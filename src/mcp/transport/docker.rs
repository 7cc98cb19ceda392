//! Container-wrapped stdio transport
//!
//! [`DockerTransport`] runs the server under test inside a container by
//! spawning `<runtime> run -i ...` as the child of an inner
//! [`StdioTransport`]. All request traffic goes through that inner transport
//! unchanged; this module adds what only a container needs:
//!
//! - a reachability probe of the runtime before anything else happens
//! - network and image preparation
//! - host directory mounts (created and canonicalized before use)
//! - log retrieval, including a snapshot taken after the container stopped
//! - a stop sequence that asks the runtime to stop the container, falls
//!   back to killing it, and then removes it
//!
//! The runtime is driven through its CLI ([`ContainerRuntime`]); any
//! docker-compatible binary works. Every runtime command runs with a bounded
//! wait.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{ConformanceError, Result};
use crate::mcp::framing::{IdGenerator, RpcOutcome};
use crate::mcp::transport::stdio::{ProcessSpec, StdioSettings, StdioTransport};
use crate::mcp::transport::{StateCell, Transport, TransportKind, TransportState};
use crate::mcp::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, ENV_DEBUG,
    ENV_PROTOCOL_VERSION,
};

const LOG_TARGET: &str = "mcp_conformance::mcp::transport::docker";

// ---------------------------------------------------------------------------
// Runtime CLI
// ---------------------------------------------------------------------------

/// Thin driver for a docker-compatible container runtime CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    /// Runtime executable, e.g. `docker` or `podman`.
    pub binary: String,
    /// Bound on the reachability probe.
    pub probe_timeout: Duration,
    /// Bound on every other runtime command.
    pub command_timeout: Duration,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            probe_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(120),
        }
    }
}

impl ContainerRuntime {
    /// Runtime driven by `binary` with default timeouts.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<std::process::Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(target: LOG_TARGET, "{} {}", self.binary, args.join(" "));
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ConformanceError::ContainerRuntime(format!(
                "cannot run `{} {}`: {}",
                self.binary,
                args.join(" "),
                e
            ))
            .into()),
            Err(_) => Err(ConformanceError::ContainerRuntime(format!(
                "`{} {}` did not finish within {:?}",
                self.binary,
                args.join(" "),
                timeout
            ))
            .into()),
        }
    }

    async fn run_checked(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ConformanceError::ContainerRuntime(format!(
                "`{} {}` failed ({}): {}",
                self.binary,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into())
        }
    }

    /// Check the runtime is installed and its daemon reachable.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::ContainerRuntime`] when the binary is
    /// missing, fails, or does not answer within `probe_timeout`.
    pub async fn probe(&self) -> Result<String> {
        let version = self.run_checked(&["version"], self.probe_timeout).await?;
        Ok(version.trim().to_string())
    }

    /// Create network `name` unless it already exists.
    pub async fn ensure_network(&self, name: &str) -> Result<()> {
        let inspect = self
            .run(&["network", "inspect", name], self.command_timeout)
            .await?;
        if inspect.status.success() {
            return Ok(());
        }
        tracing::info!(target: LOG_TARGET, network = name, "creating container network");
        self.run_checked(&["network", "create", name], self.command_timeout)
            .await
            .map(|_| ())
    }

    /// Pull `image` unless it is already present locally.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let inspect = self
            .run(&["image", "inspect", image], self.command_timeout)
            .await?;
        if inspect.status.success() {
            return Ok(());
        }
        tracing::info!(target: LOG_TARGET, image, "pulling container image");
        self.run_checked(&["pull", image], self.command_timeout)
            .await
            .map(|_| ())
    }

    /// Combined stdout/stderr log output of container `name`.
    pub async fn logs(&self, name: &str) -> Result<String> {
        let output = self.run(&["logs", name], self.command_timeout).await?;
        if !output.status.success() {
            return Err(ConformanceError::ContainerRuntime(format!(
                "`{} logs {}` failed: {}",
                self.binary,
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    /// Ask the runtime to stop `name`, allowing `grace` before it kills.
    pub async fn stop_container(&self, name: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().max(1).to_string();
        self.run_checked(
            &["stop", "-t", &secs, name],
            self.command_timeout + grace,
        )
        .await
        .map(|_| ())
    }

    /// Kill `name` immediately.
    pub async fn kill_container(&self, name: &str) -> Result<()> {
        self.run_checked(&["kill", name], self.command_timeout)
            .await
            .map(|_| ())
    }

    /// Remove `name`, whether or not it is still running.
    pub async fn remove_container(&self, name: &str) -> Result<()> {
        self.run_checked(&["rm", "-f", name], self.command_timeout)
            .await
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Container description
// ---------------------------------------------------------------------------

/// A host directory bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Directory on the host; created if missing.
    pub host: PathBuf,
    /// Mount point inside the container.
    pub container: String,
}

/// What container to run and how.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Arguments passed after the image (the server's own command line).
    pub args: Vec<String>,
    /// Network to attach to, created on demand.
    pub network: Option<String>,
    /// Optional bind mount.
    pub mount: Option<MountSpec>,
    /// Extra environment for the container, in addition to the protocol
    /// variables.
    pub env: BTreeMap<String, String>,
    /// Prefix of the generated container name.
    pub name_prefix: String,
    /// Pull the image when it is not present locally.
    pub pull: bool,
}

impl ContainerSpec {
    /// A spec for `image` with no arguments, network, or mount.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            args: Vec::new(),
            network: None,
            mount: None,
            env: BTreeMap::new(),
            name_prefix: "mcp-conformance".to_string(),
            pull: true,
        }
    }
}

/// Create `host` if needed and return its canonical absolute path.
///
/// # Errors
///
/// Returns [`ConformanceError::ContainerRuntime`] if the directory cannot be
/// created or resolved.
pub fn prepare_mount(host: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(host).map_err(|e| {
        ConformanceError::ContainerRuntime(format!(
            "cannot create mount directory {}: {}",
            host.display(),
            e
        ))
    })?;
    let canonical = host.canonicalize().map_err(|e| {
        ConformanceError::ContainerRuntime(format!(
            "cannot resolve mount directory {}: {}",
            host.display(),
            e
        ))
    })?;
    Ok(canonical)
}

/// Generate a container name `<prefix>-<uuid>`.
pub fn container_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Arguments for `<runtime> run` that start `spec` attached to stdio.
///
/// The container is not auto-removed, so its logs outlive the server
/// process; [`DockerTransport`] removes it at the end of `stop()`.
/// `mount_host` must already be prepared with [`prepare_mount`].
pub fn build_run_args(
    spec: &ContainerSpec,
    name: &str,
    mount_host: Option<&Path>,
    protocol_version: &str,
    debug: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-i".into(),
        "--name".into(),
        name.into(),
    ];
    if let Some(network) = &spec.network {
        args.push("--network".into());
        args.push(network.clone());
    }
    if let (Some(mount), Some(host)) = (&spec.mount, mount_host) {
        args.push("-v".into());
        args.push(format!("{}:{}", host.display(), mount.container));
    }
    args.push("-e".into());
    args.push(format!("{}={}", ENV_PROTOCOL_VERSION, protocol_version));
    if debug {
        args.push("-e".into());
        args.push(format!("{}=1", ENV_DEBUG));
    }
    for (key, value) in &spec.env {
        args.push("-e".into());
        args.push(format!("{}={}", key, value));
    }
    args.push(spec.image.clone());
    args.extend(spec.args.iter().cloned());
    args
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunningContainer {
    name: String,
    inner: Arc<StdioTransport>,
}

/// Stdio transport whose child is a container runtime invocation.
#[derive(Debug)]
pub struct DockerTransport {
    runtime: ContainerRuntime,
    container: ContainerSpec,
    settings: StdioSettings,
    protocol_version: String,
    ids: Arc<IdGenerator>,
    state: StateCell,
    running: Mutex<Option<RunningContainer>>,
    /// Logs captured from the last container just before it was removed.
    final_logs: Mutex<Option<String>>,
}

impl DockerTransport {
    /// Create an unstarted transport.
    ///
    /// `settings.protocol_version` and `settings.debug` are forwarded into
    /// the container with `-e`; the runtime process itself does not get them.
    pub fn new(
        runtime: ContainerRuntime,
        container: ContainerSpec,
        settings: StdioSettings,
        protocol_version: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            container,
            settings,
            protocol_version: protocol_version.into(),
            ids: Arc::new(IdGenerator::new()),
            state: StateCell::new(),
            running: Mutex::new(None),
            final_logs: Mutex::new(None),
        }
    }

    /// The runtime driver.
    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    /// Name of the running container.
    pub async fn container_name(&self) -> Option<String> {
        self.running.lock().await.as_ref().map(|r| r.name.clone())
    }

    /// Log output of the current container.
    ///
    /// Works after the server process has exited. Once the transport is
    /// stopped, returns the snapshot taken before the container was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::NotStarted`] when no container was ever
    /// run and [`ConformanceError::ContainerRuntime`] if the runtime fails.
    pub async fn logs(&self) -> Result<String> {
        if let Some(name) = self.container_name().await {
            return self.runtime.logs(&name).await;
        }
        self.final_logs
            .lock()
            .await
            .clone()
            .ok_or_else(|| ConformanceError::NotStarted.into())
    }

    /// Stderr of the runtime client process (where `-i` relays the
    /// container's stderr).
    pub async fn stderr_lines(&self) -> Vec<String> {
        match self.inner().await {
            Some(inner) => inner.stderr_lines(),
            None => Vec::new(),
        }
    }

    async fn inner(&self) -> Option<Arc<StdioTransport>> {
        self.running.lock().await.as_ref().map(|r| Arc::clone(&r.inner))
    }
}

#[async_trait::async_trait]
impl Transport for DockerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Docker
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    /// Probe the runtime, prepare network/image/mount, and run the container.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::ContainerRuntime`] when the runtime is
    /// unreachable or a preparation step fails, and
    /// [`ConformanceError::McpTransport`] if the runtime client cannot be
    /// spawned.
    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() && self.state.get() == TransportState::Running {
            return Ok(());
        }

        let version = self.runtime.probe().await?;
        tracing::debug!(target: LOG_TARGET, "container runtime reachable: {}", version);

        if let Some(network) = &self.container.network {
            self.runtime.ensure_network(network).await?;
        }
        if self.container.pull {
            self.runtime.ensure_image(&self.container.image).await?;
        }
        let mount_host = match &self.container.mount {
            Some(mount) => Some(prepare_mount(&mount.host)?),
            None => None,
        };

        let name = container_name(&self.container.name_prefix);
        let args = build_run_args(
            &self.container,
            &name,
            mount_host.as_deref(),
            &self.protocol_version,
            self.settings.debug,
        );

        let inner_settings = StdioSettings {
            protocol_version: None,
            debug: false,
            ..self.settings.clone()
        };
        let inner = StdioTransport::new(
            ProcessSpec::new(self.runtime.binary.clone()).with_args(args),
            inner_settings,
        )
        .relabel(TransportKind::Docker, name.clone())
        .share_ids(Arc::clone(&self.ids));
        inner.start().await?;

        tracing::info!(
            target: LOG_TARGET,
            container = %name,
            image = %self.container.image,
            "started MCP server container"
        );
        *running = Some(RunningContainer {
            name,
            inner: Arc::new(inner),
        });
        self.state.set(TransportState::Running);
        Ok(())
    }

    /// Handshake, `stop -t`, `kill` fallback, release the client process,
    /// snapshot the logs, then `rm -f` the container.
    async fn stop(&self) -> Result<()> {
        if self.state.get() == TransportState::Unstarted {
            return Ok(());
        }
        let taken = self.running.lock().await.take();
        if let Some(RunningContainer { name, inner }) = taken {
            inner.handshake().await;
            if let Err(e) = self
                .runtime
                .stop_container(&name, self.settings.shutdown_grace)
                .await
            {
                tracing::warn!(
                    target: LOG_TARGET,
                    container = %name,
                    "container stop failed, killing: {}",
                    e
                );
                if let Err(e) = self.runtime.kill_container(&name).await {
                    tracing::warn!(target: LOG_TARGET, container = %name, "container kill failed: {}", e);
                }
            }
            inner.release().await;

            match self.runtime.logs(&name).await {
                Ok(logs) => *self.final_logs.lock().await = Some(logs),
                Err(e) => {
                    tracing::warn!(target: LOG_TARGET, container = %name, "cannot capture logs: {}", e)
                }
            }
            if let Err(e) = self.runtime.remove_container(&name).await {
                tracing::warn!(target: LOG_TARGET, container = %name, "container removal failed: {}", e);
            }
            tracing::info!(target: LOG_TARGET, container = %name, "stopped MCP server container");
        }
        self.state.set(TransportState::Stopped);
        Ok(())
    }

    async fn send_request(&self, request: JsonRpcRequest) -> RpcOutcome {
        match self.inner().await {
            Some(inner) => inner.send_request(request).await,
            None => RpcOutcome::not_started(Some(request.id)),
        }
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        match self.inner().await {
            Some(inner) => inner.send_notification(notification).await,
            None => Err(ConformanceError::NotStarted.into()),
        }
    }

    async fn send_batch(&self, batch: Vec<JsonRpcMessage>) -> Vec<RpcOutcome> {
        match self.inner().await {
            Some(inner) => inner.send_batch(batch).await,
            None => vec![RpcOutcome::not_started(None)],
        }
    }

    async fn is_alive(&self) -> bool {
        match self.inner().await {
            Some(inner) => inner.is_alive().await,
            None => false,
        }
    }

    fn next_id(&self) -> RequestId {
        self.ids.next()
    }
}
