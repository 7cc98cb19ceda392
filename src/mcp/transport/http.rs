//! JSON-RPC over HTTP transport
//!
//! [`HttpTransport`] sends every outbound JSON-RPC message as an HTTP POST to
//! a single endpoint. The server may reply with:
//!
//! - `application/json` -- the response (or batch reply) as the body
//! - `text/event-stream` -- an SSE stream whose `data:` payloads carry
//!   JSON-RPC messages; the one answering the request is picked out
//! - `202 Accepted` / `204 No Content` -- acknowledgement of a notification
//!
//! # Session management
//!
//! The first successful `initialize` response assigns the session. The
//! identifier is looked up in this order:
//!
//! 1. `result.sessionId`
//! 2. `result.session_id`
//! 3. the `Mcp-Session-Id` response header (any capitalization)
//!
//! Once known it is attached to every subsequent POST as `Mcp-Session-Id`
//! until [`HttpTransport::clear_session`] or `stop()`. A `404` while a
//! session is active clears it.
//!
//! # Protocol version header
//!
//! `MCP-Protocol-Version` is only sent when the configured version is the
//! newest supported one; older revisions predate the header.

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{ConformanceError, Result};
use crate::mcp::framing::{classify_frame, parse_batch, parse_response, FrameDisposition, IdGenerator, RpcOutcome};
use crate::mcp::transport::{StateCell, Transport, TransportKind, TransportState};
use crate::mcp::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, LATEST_PROTOCOL_VERSION,
    METHOD_EXIT, METHOD_INITIALIZE, METHOD_SHUTDOWN, PROTOCOL_VERSION_HEADER, SESSION_HEADER,
};

const LOG_TARGET: &str = "mcp_conformance::mcp::transport::http";

/// Settings for an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Bound on each step of the stop sequence.
    pub shutdown_grace: Duration,
    /// Protocol version the client speaks; controls `MCP-Protocol-Version`.
    pub protocol_version: String,
    /// Static extra headers merged into every request (e.g. Authorization).
    pub headers: HashMap<String, String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(2),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            headers: HashMap::new(),
        }
    }
}

/// Pick the session identifier out of an `initialize` exchange.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::transport::http::extract_session_id;
/// use reqwest::header::HeaderMap;
/// use serde_json::json;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("mcp-session-id", "from-header".parse().unwrap());
///
/// let body = json!({"sessionId": "abc123"});
/// assert_eq!(extract_session_id(&body, &headers).as_deref(), Some("abc123"));
/// assert_eq!(extract_session_id(&json!({}), &headers).as_deref(), Some("from-header"));
/// ```
pub fn extract_session_id(result: &Value, headers: &HeaderMap) -> Option<String> {
    let from_body = ["sessionId", "session_id"].iter().find_map(|key| {
        result
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });
    from_body.or_else(|| {
        // HeaderMap lookups are case-insensitive.
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// HTTP transport with a server-assigned session.
///
/// # Examples
///
/// ```no_run
/// use mcp_conformance::mcp::transport::http::{HttpSettings, HttpTransport};
/// use mcp_conformance::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = HttpTransport::new(
///     url::Url::parse("http://localhost:3000/mcp")?,
///     HttpSettings::default(),
/// )?;
/// transport.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: url::Url,
    settings: HttpSettings,
    session_id: RwLock<Option<String>>,
    last_event_id: RwLock<Option<String>>,
    ids: IdGenerator,
    state: StateCell,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. No network I/O happens
    /// until the first request.
    ///
    /// # Errors
    ///
    /// Returns [`ConformanceError::McpTransport`] if the HTTP client cannot
    /// be built (TLS initialisation failure).
    pub fn new(endpoint: url::Url, settings: HttpSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| {
                ConformanceError::McpTransport(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http_client,
            endpoint,
            settings,
            session_id: RwLock::new(None),
            last_event_id: RwLock::new(None),
            ids: IdGenerator::new(),
            state: StateCell::new(),
        })
    }

    /// The endpoint every message is posted to.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// The current session identifier.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Forget the session; the next `initialize` may establish a new one.
    pub async fn clear_session(&self) {
        *self.session_id.write().await = None;
    }

    /// Id of the last SSE event seen, if the server numbers its events.
    pub async fn last_event_id(&self) -> Option<String> {
        self.last_event_id.read().await.clone()
    }

    fn sends_version_header(&self) -> bool {
        self.settings.protocol_version == LATEST_PROTOCOL_VERSION
    }

    async fn with_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.sends_version_header() {
            req = req.header(PROTOCOL_VERSION_HEADER, &self.settings.protocol_version);
        }
        if let Some(ref id) = *self.session_id.read().await {
            req = req.header(SESSION_HEADER, id.as_str());
        }
        for (k, v) in &self.settings.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    async fn post(
        &self,
        body: String,
        timeout: Duration,
    ) -> std::result::Result<reqwest::Response, String> {
        let req = self
            .http_client
            .post(self.endpoint.as_str())
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);
        let req = self.with_headers(req).await;
        req.send()
            .await
            .map_err(|e| format!("HTTP POST to {} failed: {}", self.endpoint, e))
    }

    /// Turn a non-success status into a fault, clearing an expired session.
    async fn status_fault(
        &self,
        id: Option<RequestId>,
        response: reqwest::Response,
    ) -> RpcOutcome {
        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id.read().await.is_some() {
            tracing::warn!(target: LOG_TARGET, "server answered 404, session expired");
            self.clear_session().await;
        }
        let body = response.text().await.unwrap_or_default();
        RpcOutcome::TransportFault {
            id,
            error: crate::mcp::types::JsonRpcError::new(
                crate::mcp::types::TRANSPORT_ERROR,
                format!("HTTP POST returned status {}", status),
            )
            .with_data(json!({"status": status.as_u16(), "body": body})),
        }
    }

    async fn exchange(&self, request: &JsonRpcRequest, timeout: Duration) -> RpcOutcome {
        let id = request.id.clone();
        let body = match serde_json::to_string(request) {
            Ok(b) => b,
            Err(e) => return RpcOutcome::transport_fault(Some(id), e.to_string()),
        };
        tracing::debug!(target: LOG_TARGET, "-> {}", body);

        let response = match self.post(body, timeout).await {
            Ok(r) => r,
            Err(msg) => return RpcOutcome::transport_fault(Some(id), msg),
        };
        if !response.status().is_success() {
            return self.status_fault(Some(id), response).await;
        }

        let headers = response.headers().clone();
        let outcome = if is_event_stream(&headers) {
            self.read_event_stream(response, &id).await
        } else {
            match response.bytes().await {
                Ok(bytes) if bytes.is_empty() => RpcOutcome::transport_fault(
                    Some(id.clone()),
                    "empty response body for a request",
                ),
                Ok(bytes) => {
                    tracing::debug!(target: LOG_TARGET, "<- {}", String::from_utf8_lossy(&bytes));
                    parse_response(&bytes, Some(&id))
                }
                Err(e) => RpcOutcome::transport_fault(
                    Some(id.clone()),
                    format!("failed to read response body: {}", e),
                ),
            }
        };

        if request.method == METHOD_INITIALIZE {
            if let RpcOutcome::Success { result, .. } = &outcome {
                self.capture_session(result, &headers).await;
            }
        }
        outcome
    }

    async fn capture_session(&self, result: &Value, headers: &HeaderMap) {
        let mut sid = self.session_id.write().await;
        if sid.is_some() {
            return;
        }
        if let Some(new_id) = extract_session_id(result, headers) {
            tracing::info!(target: LOG_TARGET, session = %new_id, "session established");
            *sid = Some(new_id);
        }
    }

    /// Consume SSE events until one answers `id`.
    async fn read_event_stream(&self, response: reqwest::Response, id: &RequestId) -> RpcOutcome {
        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::default();
        loop {
            let payloads = match stream.next().await {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(e)) => {
                    return RpcOutcome::transport_fault(
                        Some(id.clone()),
                        format!("event stream failed: {}", e),
                    )
                }
                None => decoder.finish(),
            };
            if let Some(event_id) = decoder.last_event_id.clone() {
                *self.last_event_id.write().await = Some(event_id);
            }
            for payload in payloads {
                match classify_frame(&payload, id) {
                    FrameDisposition::Matched(outcome) => {
                        tracing::debug!(target: LOG_TARGET, "<- (sse) {}", payload);
                        return outcome;
                    }
                    FrameDisposition::Skip(reason) => {
                        tracing::debug!(target: LOG_TARGET, "skipping sse event: {}", reason);
                    }
                }
            }
            if decoder.is_finished() {
                return RpcOutcome::transport_fault(
                    Some(id.clone()),
                    "event stream ended without a response",
                );
            }
        }
    }

    async fn post_notification(
        &self,
        notification: &JsonRpcNotification,
        timeout: Duration,
    ) -> Result<()> {
        let body = serde_json::to_string(notification)?;
        tracing::debug!(target: LOG_TARGET, "-> {}", body);
        let response = self
            .post(body, timeout)
            .await
            .map_err(ConformanceError::McpTransport)?;
        let status = response.status();
        if matches!(
            status,
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
        ) {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND && self.session_id.read().await.is_some() {
            self.clear_session().await;
        }
        Err(ConformanceError::McpTransport(format!(
            "notification `{}` returned status {}",
            notification.method, status
        ))
        .into())
    }

    async fn delete_session(&self) {
        let sid = match self.session_id().await {
            Some(sid) => sid,
            None => return,
        };
        let mut req = self
            .http_client
            .delete(self.endpoint.as_str())
            .timeout(self.settings.shutdown_grace)
            .header(SESSION_HEADER, sid.as_str());
        for (k, v) in &self.settings.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        match req.send().await {
            Ok(resp) => {
                tracing::debug!(target: LOG_TARGET, status = %resp.status(), "session DELETE")
            }
            Err(e) => tracing::debug!(target: LOG_TARGET, "session DELETE failed: {}", e),
        }
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    /// HTTP holds no connection of its own; starting only opens the gate.
    async fn start(&self) -> Result<()> {
        if self.state.get() != TransportState::Running {
            tracing::info!(target: LOG_TARGET, endpoint = %self.endpoint, "HTTP transport ready");
            self.state.set(TransportState::Running);
        }
        Ok(())
    }

    /// Handshake, terminate the session with DELETE, and forget it.
    async fn stop(&self) -> Result<()> {
        if self.state.get() == TransportState::Running {
            let grace = self.settings.shutdown_grace;
            let request = JsonRpcRequest::new(self.ids.next(), METHOD_SHUTDOWN, Value::Null);
            if let Some(err) = self.exchange(&request, grace).await.error() {
                tracing::debug!(target: LOG_TARGET, "shutdown during stop: {}", err);
            }
            let exit = JsonRpcNotification::new(METHOD_EXIT, Value::Null);
            if let Err(e) = self.post_notification(&exit, grace).await {
                tracing::debug!(target: LOG_TARGET, "exit during stop: {}", e);
            }
            self.delete_session().await;
        }
        self.clear_session().await;
        if self.state.get() != TransportState::Unstarted {
            self.state.set(TransportState::Stopped);
        }
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
        self.post_notification(&notification, self.settings.request_timeout)
            .await
    }

    async fn send_batch(&self, batch: Vec<JsonRpcMessage>) -> Vec<RpcOutcome> {
        if self.state.get() != TransportState::Running {
            return vec![RpcOutcome::not_started(None)];
        }
        let body = match serde_json::to_string(&batch) {
            Ok(b) => b,
            Err(e) => return vec![RpcOutcome::transport_fault(None, e.to_string())],
        };
        tracing::debug!(target: LOG_TARGET, "-> {}", body);
        let response = match self.post(body, self.settings.request_timeout).await {
            Ok(r) => r,
            Err(msg) => return vec![RpcOutcome::transport_fault(None, msg)],
        };
        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Vec::new();
        }
        if !status.is_success() {
            return vec![self.status_fault(None, response).await];
        }
        if is_event_stream(response.headers()) {
            let mut decoder = SseDecoder::default();
            let mut outcomes = Vec::new();
            let mut stream = Box::pin(response.bytes_stream());
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        for payload in decoder.push(&chunk) {
                            outcomes.extend(parse_batch(payload.as_bytes()));
                        }
                    }
                    Err(e) => {
                        outcomes.push(RpcOutcome::transport_fault(
                            None,
                            format!("event stream failed: {}", e),
                        ));
                        return outcomes;
                    }
                }
            }
            for payload in decoder.finish() {
                outcomes.extend(parse_batch(payload.as_bytes()));
            }
            return outcomes;
        }
        match response.bytes().await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => parse_batch(&bytes),
            Err(e) => vec![RpcOutcome::transport_fault(
                None,
                format!("failed to read response body: {}", e),
            )],
        }
    }

    async fn is_alive(&self) -> bool {
        self.state.get() == TransportState::Running
    }

    fn next_id(&self) -> RequestId {
        self.ids.next()
    }
}

// ---------------------------------------------------------------------------
// SSE decoding
// ---------------------------------------------------------------------------

/// Incremental decoder for a `text/event-stream` body.
///
/// Feed raw chunks with [`SseDecoder::push`]; complete events come back as
/// their joined `data:` payloads. Bytes are buffered until an event is
/// complete, so a UTF-8 sequence split across chunks decodes intact.
///
/// - `id:` is remembered in `last_event_id`.
/// - `event: ping` and `data: [PING]` (case-insensitive) are discarded.
/// - `retry:` and comment lines are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    finished: bool,
    /// Last `id:` field seen.
    pub last_event_id: Option<String>,
}

impl SseDecoder {
    /// Append a chunk and return the payloads of any events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.contains(&b'\r') {
            self.buffer = strip_carriage_returns(&self.buffer);
        }
        let mut payloads = Vec::new();
        while let Some(pos) = find_blank_line(&self.buffer) {
            let block = self.buffer.split_to(pos + 2);
            if let Some(data) = self.process_event(&String::from_utf8_lossy(&block)) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        self.finished = true;
        let rest = self.buffer.split();
        let rest = String::from_utf8_lossy(&rest);
        if rest.trim().is_empty() {
            return Vec::new();
        }
        self.process_event(&rest).into_iter().collect()
    }

    /// True once [`SseDecoder::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn process_event(&mut self, block: &str) -> Option<String> {
        let mut data_lines: Vec<&str> = Vec::new();
        let mut event_type: Option<&str> = None;

        for line in block.lines() {
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.trim());
            } else if let Some(value) = line.strip_prefix("id:") {
                self.last_event_id = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("event:") {
                event_type = Some(value.trim());
            }
        }

        if event_type.map(|t| t.eq_ignore_ascii_case("ping")).unwrap_or(false) {
            return None;
        }
        let data = data_lines.join("\n");
        if data.is_empty() || data.eq_ignore_ascii_case("[ping]") {
            return None;
        }
        Some(data)
    }
}

/// `\r\n` line endings become `\n`. A trailing `\r` is kept until the next
/// chunk shows what follows it.
fn strip_carriage_returns(buffer: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(buffer.len());
    for (i, &b) in buffer.iter().enumerate() {
        if b == b'\r' && buffer.get(i + 1) == Some(&b'\n') {
            continue;
        }
        out.extend_from_slice(&[b]);
    }
    out
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}
