//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and talks to it over its stdin/stdout pipes using newline-delimited JSON.
//! It is the transport for locally installed servers and, wrapped by
//! [`crate::mcp::transport::docker::DockerTransport`], for containerized ones.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   value followed by `\n`, then flushed.
//! - Inbound messages are read from the child's stdout one line at a time
//!   until a response carrying the awaited id arrives. Server-initiated
//!   messages and stale responses are skipped.
//! - The child's stderr is drained into a bounded [`StderrSink`] and logged at
//!   `DEBUG`. It is never treated as an error condition.
//!
//! # Lifecycle
//!
//! [`StdioTransport::new`] only records what to run. [`Transport::start`]
//! spawns the child; [`Transport::stop`] performs the `shutdown`/`exit`
//! handshake, closes stdin, and escalates to SIGTERM and finally a kill if
//! the child does not leave on its own. Every wait along the way is bounded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ConformanceError, Result};
use crate::mcp::framing::{classify_frame, encode_line, parse_batch, FrameDisposition, IdGenerator, RpcOutcome};
use crate::mcp::transport::stderr::{spawn_drain, StderrSink, DEFAULT_STDERR_CAPACITY};
use crate::mcp::transport::{StateCell, Transport, TransportKind, TransportState};
use crate::mcp::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, ENV_DEBUG,
    ENV_PROTOCOL_VERSION, METHOD_EXIT, METHOD_SHUTDOWN,
};

const LOG_TARGET: &str = "mcp_conformance::mcp::transport::stdio";

// ---------------------------------------------------------------------------
// Process description
// ---------------------------------------------------------------------------

/// What to execute for a stdio server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment variables. The parent environment is inherited.
    pub env: HashMap<String, String>,
    /// Working directory for the child, if not the current one.
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    /// Describe `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// Split a shell-style command line into program and arguments.
    ///
    /// Quoting follows POSIX shell rules; no expansion is performed.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::Config`] for unbalanced quotes or an empty
    /// command.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_conformance::mcp::transport::stdio::ProcessSpec;
    ///
    /// let spec = ProcessSpec::from_command_line("python3 -m 'my server'").unwrap();
    /// assert_eq!(spec.program, "python3");
    /// assert_eq!(spec.args, vec!["-m".to_string(), "my server".to_string()]);
    /// ```
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut words = shell_words::split(command).map_err(|e| {
            ConformanceError::Config(format!("cannot parse server command `{}`: {}", command, e))
        })?;
        if words.is_empty() {
            return Err(ConformanceError::Config("server command is empty".into()).into());
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            env: HashMap::new(),
            working_dir: None,
        })
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn display_name(&self) -> String {
        std::path::Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }
}

/// Timing and environment knobs for a [`StdioTransport`].
#[derive(Debug, Clone)]
pub struct StdioSettings {
    /// Upper bound on one request/response exchange.
    pub request_timeout: Duration,
    /// How many times a failed write is retried.
    pub write_retries: u32,
    /// Pause between write attempts.
    pub retry_delay: Duration,
    /// Bound on each stage of the stop sequence.
    pub shutdown_grace: Duration,
    /// Stderr lines retained for diagnostics.
    pub stderr_buffer_lines: usize,
    /// Exported to the child as `MCP_PROTOCOL_VERSION` when set.
    pub protocol_version: Option<String>,
    /// Exports `MCP_DEBUG=1` to the child.
    pub debug: bool,
}

impl Default for StdioSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            write_retries: 3,
            retry_delay: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(2),
            stderr_buffer_lines: DEFAULT_STDERR_CAPACITY,
            protocol_version: None,
            debug: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Child I/O
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ChildIo {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// Bytes of an incomplete line carried across cancelled reads.
    pending: Vec<u8>,
    /// Set while a frame is being written. Still set afterwards means the
    /// write was cut short and stdin holds a partial frame.
    torn_write: bool,
}

impl ChildIo {
    /// Next non-empty line from stdout, or `None` at EOF.
    ///
    /// `read_until` appends partial data to `pending`, so a read cut short by
    /// a timeout resumes where it stopped on the next call.
    async fn next_frame(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let n = self.stdout.read_until(b'\n', &mut self.pending).await?;
            let complete = self.pending.last() == Some(&b'\n');
            if n == 0 && !complete {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let raw = std::mem::take(&mut self.pending);
                return Ok(Some(String::from_utf8_lossy(&raw).trim().to_string()));
            }
            if complete {
                let raw = std::mem::take(&mut self.pending);
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }
        }
    }

    /// Write one frame.
    ///
    /// Once a write has been interrupted (by a timeout or an error part way
    /// through) every later write is refused: appending to a partial frame
    /// would corrupt both messages.
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if self.torn_write {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "an earlier write was interrupted; restart the transport",
            ));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))?;
        self.torn_write = true;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        self.torn_write = false;
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

fn is_retryable(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::WriteZero
    )
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Stdio-based MCP transport that drives a child process.
///
/// One mutex guards the whole write-then-read exchange, so at most one
/// request is in flight at a time.
///
/// # Examples
///
/// ```no_run
/// use mcp_conformance::mcp::transport::stdio::{ProcessSpec, StdioSettings, StdioTransport};
/// use mcp_conformance::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let spec = ProcessSpec::from_command_line("python3 server.py")?;
/// let transport = StdioTransport::new(spec, StdioSettings::default());
/// transport.start().await?;
/// let outcome = transport.call("ping", serde_json::json!({})).await;
/// assert!(outcome.is_success());
/// transport.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    spec: ProcessSpec,
    settings: StdioSettings,
    label: String,
    kind: TransportKind,
    ids: Arc<IdGenerator>,
    state: StateCell,
    io: Mutex<Option<ChildIo>>,
    stderr: StderrSink,
    drain: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl StdioTransport {
    /// Create an unstarted transport for `spec`.
    pub fn new(spec: ProcessSpec, settings: StdioSettings) -> Self {
        let label = spec.display_name();
        let stderr = StderrSink::new(settings.stderr_buffer_lines);
        Self {
            spec,
            settings,
            label,
            kind: TransportKind::Stdio,
            ids: Arc::new(IdGenerator::new()),
            state: StateCell::new(),
            io: Mutex::new(None),
            stderr,
            drain: Mutex::new(None),
        }
    }

    /// Report a different [`TransportKind`] and log label; used by wrappers
    /// whose child is a launcher for the real server.
    pub(crate) fn relabel(mut self, kind: TransportKind, label: impl Into<String>) -> Self {
        self.kind = kind;
        self.label = label.into();
        self
    }

    /// Draw request ids from a counter owned by a wrapper, so ids stay unique
    /// across restarts of the inner process.
    pub(crate) fn share_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// The process description this transport runs.
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// The settings this transport was built with.
    pub fn settings(&self) -> &StdioSettings {
        &self.settings
    }

    /// Snapshot of recent stderr output from the child.
    pub fn stderr_lines(&self) -> Vec<String> {
        self.stderr.lines()
    }

    /// OS process id of the running child.
    pub async fn pid(&self) -> Option<u32> {
        self.io.lock().await.as_ref().and_then(|io| io.child.id())
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .envs(&self.spec.env);
        if let Some(version) = &self.settings.protocol_version {
            cmd.env(ENV_PROTOCOL_VERSION, version);
        }
        if self.settings.debug {
            cmd.env(ENV_DEBUG, "1");
        }
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Write `line`, retrying transient pipe errors.
    async fn write_with_retry(&self, io: &mut ChildIo, line: &str) -> std::io::Result<()> {
        let mut attempt = 0;
        loop {
            match io.write_line(line).await {
                Ok(()) => return Ok(()),
                Err(e) if is_retryable(e.kind()) && attempt < self.settings.write_retries => {
                    attempt += 1;
                    tracing::debug!(
                        target: LOG_TARGET,
                        server = %self.label,
                        "write failed ({}), retry {}/{}",
                        e,
                        attempt,
                        self.settings.write_retries
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read frames until one answers `id`.
    async fn read_response(&self, io: &mut ChildIo, id: &RequestId) -> RpcOutcome {
        loop {
            match io.next_frame().await {
                Ok(Some(frame)) => match classify_frame(&frame, id) {
                    FrameDisposition::Matched(outcome) => {
                        tracing::debug!(target: LOG_TARGET, server = %self.label, "<- {}", frame);
                        return outcome;
                    }
                    FrameDisposition::Skip(reason) => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            server = %self.label,
                            "skipping frame while waiting for {}: {}",
                            id,
                            reason
                        );
                    }
                },
                Ok(None) => {
                    return RpcOutcome::transport_fault(
                        Some(id.clone()),
                        format!("{} closed stdout before answering", self.label),
                    )
                }
                Err(e) => {
                    return RpcOutcome::transport_fault(
                        Some(id.clone()),
                        format!("read from {} failed: {}", self.label, e),
                    )
                }
            }
        }
    }

    /// One bounded write-then-read exchange.
    async fn exchange(&self, request: &JsonRpcRequest, timeout: Duration) -> RpcOutcome {
        let id = request.id.clone();
        let line = match encode_line(request) {
            Ok(l) => l,
            Err(e) => return RpcOutcome::transport_fault(Some(id), e.to_string()),
        };

        let mut guard = self.io.lock().await;
        let io = match guard.as_mut() {
            Some(io) => io,
            None => return RpcOutcome::not_started(Some(id)),
        };

        let work = async {
            tracing::debug!(target: LOG_TARGET, server = %self.label, "-> {}", line.trim_end());
            if let Err(e) = self.write_with_retry(io, &line).await {
                return RpcOutcome::transport_fault(
                    Some(id.clone()),
                    format!("write to {} failed: {}", self.label, e),
                );
            }
            self.read_response(io, &id).await
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => RpcOutcome::transport_fault(
                Some(request.id.clone()),
                format!(
                    "no response to `{}` from {} within {:?}",
                    request.method, self.label, timeout
                ),
            ),
        }
    }

    /// Best-effort `shutdown` request and `exit` notification.
    ///
    /// Failures are logged and otherwise ignored.
    pub(crate) async fn handshake(&self) {
        if self.state.get() != TransportState::Running {
            return;
        }
        let request = JsonRpcRequest::new(self.ids.next(), METHOD_SHUTDOWN, serde_json::Value::Null);
        let outcome = self.exchange(&request, self.settings.shutdown_grace).await;
        if let Some(err) = outcome.error() {
            tracing::debug!(target: LOG_TARGET, server = %self.label, "shutdown during stop: {}", err);
        }
        let exit = JsonRpcNotification::new(METHOD_EXIT, serde_json::Value::Null);
        if let Err(e) = self.write_notification(&exit).await {
            tracing::debug!(target: LOG_TARGET, server = %self.label, "exit during stop: {}", e);
        }
    }

    /// Close stdin, wait for the child, escalate, and stop the stderr drain.
    pub(crate) async fn release(&self) {
        let taken = self.io.lock().await.take();
        if let Some(mut io) = taken {
            drop(io.stdin.take());
            let grace = self.settings.shutdown_grace;

            let exited = matches!(tokio::time::timeout(grace, io.child.wait()).await, Ok(Ok(_)));
            if !exited {
                #[cfg(unix)]
                {
                    if let Some(pid) = io.child.id() {
                        tracing::debug!(target: LOG_TARGET, server = %self.label, pid, "sending SIGTERM");
                        // SAFETY: pid is a valid process ID obtained from tokio::process::Child
                        // that has not been reaped yet.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                }
                let terminated =
                    matches!(tokio::time::timeout(grace, io.child.wait()).await, Ok(Ok(_)));
                if !terminated {
                    tracing::warn!(
                        target: LOG_TARGET,
                        server = %self.label,
                        "server did not exit within {:?}, killing",
                        grace
                    );
                    let _ = io.child.kill().await;
                }
            }
        }

        let drain = self.drain.lock().await.take();
        if let Some((token, handle)) = drain {
            token.cancel();
            let _ = tokio::time::timeout(self.settings.shutdown_grace, handle).await;
        }
    }

    async fn write_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        let line = encode_line(notification)?;
        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(ConformanceError::NotStarted)?;
        tracing::debug!(target: LOG_TARGET, server = %self.label, "-> {}", line.trim_end());
        match tokio::time::timeout(self.settings.request_timeout, self.write_with_retry(io, &line)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConformanceError::McpTransport(format!(
                "write to {} failed: {}",
                self.label, e
            ))
            .into()),
            Err(_) => Err(ConformanceError::McpTransport(format!(
                "write to {} timed out",
                self.label
            ))
            .into()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    /// Spawn the child process and begin draining its stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::McpTransport`] if the process cannot be
    /// spawned or if the stdio pipes are unavailable.
    async fn start(&self) -> Result<()> {
        let mut guard = self.io.lock().await;
        if guard.is_some() && self.state.get() == TransportState::Running {
            return Ok(());
        }

        let mut child = self.build_command().spawn().map_err(|e| {
            ConformanceError::McpTransport(format!(
                "failed to spawn MCP server `{}`: {}",
                self.spec.program, e
            ))
        })?;

        // Each handle is Some because Stdio::piped() was requested above.
        let stdin = child.stdin.take().ok_or_else(|| {
            ConformanceError::McpTransport("child stdin unavailable after spawn".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ConformanceError::McpTransport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ConformanceError::McpTransport("child stderr unavailable after spawn".into())
        })?;

        let token = CancellationToken::new();
        let handle = spawn_drain(stderr, self.stderr.clone(), token.clone(), self.label.clone());
        *self.drain.lock().await = Some((token, handle));

        tracing::info!(
            target: LOG_TARGET,
            server = %self.label,
            pid = child.id(),
            "started MCP server process"
        );

        *guard = Some(ChildIo {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            pending: Vec::new(),
            torn_write: false,
        });
        self.state.set(TransportState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state.get() == TransportState::Unstarted {
            return Ok(());
        }
        self.handshake().await;
        self.release().await;
        if self.state.get() == TransportState::Running {
            tracing::info!(target: LOG_TARGET, server = %self.label, "stopped MCP server process");
        }
        self.state.set(TransportState::Stopped);
        Ok(())
    }

    async fn send_request(&self, request: JsonRpcRequest) -> RpcOutcome {
        if self.state.get() != TransportState::Running {
            return RpcOutcome::not_started(Some(request.id));
        }
        self.exchange(&request, self.settings.request_timeout).await
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        if self.state.get() != TransportState::Running {
            return Err(ConformanceError::NotStarted.into());
        }
        self.write_notification(&notification).await
    }

    async fn send_batch(&self, batch: Vec<JsonRpcMessage>) -> Vec<RpcOutcome> {
        if self.state.get() != TransportState::Running {
            return vec![RpcOutcome::not_started(None)];
        }
        let line = match encode_line(&batch) {
            Ok(l) => l,
            Err(e) => return vec![RpcOutcome::transport_fault(None, e.to_string())],
        };
        let expects_reply = batch.iter().any(|m| m.id().is_some());

        let mut guard = self.io.lock().await;
        let io = match guard.as_mut() {
            Some(io) => io,
            None => return vec![RpcOutcome::not_started(None)],
        };

        let work = async {
            tracing::debug!(target: LOG_TARGET, server = %self.label, "-> {}", line.trim_end());
            if let Err(e) = self.write_with_retry(io, &line).await {
                return vec![RpcOutcome::transport_fault(
                    None,
                    format!("write to {} failed: {}", self.label, e),
                )];
            }
            if !expects_reply {
                return Vec::new();
            }
            loop {
                match io.next_frame().await {
                    Ok(Some(frame)) => {
                        // Skip server-initiated messages that arrive ahead of the reply.
                        let is_request = serde_json::from_str::<serde_json::Value>(&frame)
                            .map(|v| v.get("method").is_some())
                            .unwrap_or(false);
                        if is_request {
                            continue;
                        }
                        tracing::debug!(target: LOG_TARGET, server = %self.label, "<- {}", frame);
                        return parse_batch(frame.as_bytes());
                    }
                    Ok(None) => {
                        return vec![RpcOutcome::transport_fault(
                            None,
                            format!("{} closed stdout before answering batch", self.label),
                        )]
                    }
                    Err(e) => {
                        return vec![RpcOutcome::transport_fault(
                            None,
                            format!("read from {} failed: {}", self.label, e),
                        )]
                    }
                }
            }
        };

        match tokio::time::timeout(self.settings.request_timeout, work).await {
            Ok(outcomes) => outcomes,
            Err(_) => vec![RpcOutcome::transport_fault(
                None,
                format!("no batch response from {} within {:?}", self.label, self.settings.request_timeout),
            )],
        }
    }

    async fn is_alive(&self) -> bool {
        if self.state.get() != TransportState::Running {
            return false;
        }
        match self.io.try_lock() {
            Ok(mut guard) => guard.as_mut().map(ChildIo::is_running).unwrap_or(false),
            // An exchange is in flight, so the child was alive a moment ago.
            Err(_) => true,
        }
    }

    fn next_id(&self) -> RequestId {
        self.ids.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::TRANSPORT_ERROR;
    use serde_json::json;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").with_args(["-c", script])
    }

    fn quick() -> StdioSettings {
        StdioSettings {
            request_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(300),
            retry_delay: Duration::from_millis(10),
            ..StdioSettings::default()
        }
    }

    #[test]
    fn test_from_command_line_rejects_empty_and_unbalanced() {
        assert!(ProcessSpec::from_command_line("   ").is_err());
        assert!(ProcessSpec::from_command_line("server 'unterminated").is_err());
    }

    #[test]
    fn test_display_name_strips_directories() {
        let spec = ProcessSpec::new("/usr/local/bin/my-server");
        assert_eq!(spec.display_name(), "my-server");
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_executable_returns_error() {
        let transport = StdioTransport::new(
            ProcessSpec::new("/nonexistent/binary/that/does/not/exist"),
            quick(),
        );
        let err = transport.start().await.unwrap_err();
        assert!(
            err.to_string().contains("failed to spawn"),
            "unexpected error message: {err}"
        );
        assert_eq!(transport.state(), TransportState::Unstarted);
    }

    #[tokio::test]
    async fn test_request_before_start_is_not_started_fault() {
        let transport = StdioTransport::new(ProcessSpec::new("cat"), quick());
        let outcome = transport.call("ping", json!({})).await;
        assert!(outcome.is_transport_fault());
        assert_eq!(outcome.error().unwrap().code, TRANSPORT_ERROR);

        let err = transport
            .send_notification(JsonRpcNotification::new("x", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConformanceError>(),
            Some(ConformanceError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_ok_and_repeatable() {
        let transport = StdioTransport::new(ProcessSpec::new("cat"), quick());
        transport.stop().await.unwrap();
        transport.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skips_notification_before_matching_response() {
        let script = r#"read line
printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/message","params":{}}'
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'
sleep 5"#;
        let transport = StdioTransport::new(sh(script), quick());
        transport.start().await.unwrap();
        let outcome = transport.call("anything", json!({})).await;
        assert_eq!(
            outcome,
            RpcOutcome::Success {
                id: RequestId::Number(1),
                result: json!({"ok": true})
            }
        );
        transport.stop().await.unwrap();
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reply_to_notification_is_not_taken_for_next_response() {
        let script = r#"read note
printf '%s\n' '{"jsonrpc":"2.0","id":null,"error":{"code":-32601,"message":"unknown notification"}}'
read line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'
sleep 5"#;
        let transport = StdioTransport::new(sh(script), quick());
        transport.start().await.unwrap();
        transport
            .send_notification(JsonRpcNotification::new("notifications/initialized", json!({})))
            .await
            .unwrap();
        let outcome = transport.call("ping", json!({})).await;
        assert_eq!(
            outcome,
            RpcOutcome::Success {
                id: RequestId::Number(1),
                result: json!({"ok": true})
            }
        );
        transport.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupted_write_makes_channel_unusable() {
        // Never reads stdin, so a frame larger than the pipe buffer blocks.
        let settings = StdioSettings {
            request_timeout: Duration::from_millis(300),
            ..quick()
        };
        let transport = StdioTransport::new(sh("sleep 30"), settings);
        transport.start().await.unwrap();

        let big = "x".repeat(1 << 20);
        let first = transport.call("echo", json!({ "text": big })).await;
        assert!(first.is_transport_fault());

        let second = transport.call("ping", json!({})).await;
        assert!(second.is_transport_fault());
        assert!(
            second.error().unwrap().message.contains("interrupted"),
            "unexpected fault: {:?}",
            second
        );
        assert!(transport
            .send_notification(JsonRpcNotification::new("x", json!({})))
            .await
            .is_err());

        transport.stop().await.unwrap();
        assert_eq!(transport.state(), TransportState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_eof_yields_transport_fault() {
        let transport = StdioTransport::new(sh("read line; exit 0"), quick());
        transport.start().await.unwrap();
        let outcome = transport.call("ping", json!({})).await;
        assert!(outcome.is_transport_fault());
        assert_eq!(outcome.id(), Some(&RequestId::Number(1)));
        transport.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_malformed_line_yields_parse_fault_with_request_id() {
        let transport = StdioTransport::new(sh("read line; echo 'not json'; sleep 5"), quick());
        transport.start().await.unwrap();
        let outcome = transport.call("ping", json!({})).await;
        assert_eq!(outcome.error().unwrap().code, crate::mcp::types::PARSE_ERROR);
        assert_eq!(outcome.id(), Some(&RequestId::Number(1)));
        transport.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_captured_not_fatal() {
        let script = r#"echo 'booting' >&2
read line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
sleep 5"#;
        let transport = StdioTransport::new(sh(script), quick());
        transport.start().await.unwrap();
        assert!(transport.call("ping", json!({})).await.is_success());
        transport.stop().await.unwrap();
        assert!(transport.stderr_lines().contains(&"booting".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_terminates_unresponsive_child() {
        // Ignores stdin entirely and never exits on its own.
        let transport = StdioTransport::new(sh("trap '' TERM; sleep 30"), quick());
        transport.start().await.unwrap();
        assert!(transport.is_alive().await);
        let started = std::time::Instant::now();
        transport.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!transport.is_alive().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_sees_protocol_environment() {
        let script = r#"read line
printf '{"jsonrpc":"2.0","id":1,"result":{"v":"%s","d":"%s"}}\n' "$MCP_PROTOCOL_VERSION" "$MCP_DEBUG"
sleep 5"#;
        let settings = StdioSettings {
            protocol_version: Some("2025-03-26".into()),
            debug: true,
            ..quick()
        };
        let transport = StdioTransport::new(sh(script), settings);
        transport.start().await.unwrap();
        let result = transport.call("env", json!({})).await.into_result().unwrap();
        assert_eq!(result, json!({"v": "2025-03-26", "d": "1"}));
        transport.stop().await.unwrap();
    }
}
