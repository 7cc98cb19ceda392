//! Scripted in-process transport for unit tests
//!
//! [`ScriptedTransport`] answers every request by calling a handler closure
//! and records everything the code under test sent, so adapter logic can be
//! exercised without spawning processes or opening sockets.
//!
//! ```text
//! adapter send_request() --> handler(&request) --> RpcOutcome
//!                       \--> requests log (inspected by the test)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{ConformanceError, Result};
use crate::mcp::framing::{IdGenerator, RpcOutcome};
use crate::mcp::transport::{StateCell, Transport, TransportKind, TransportState};
use crate::mcp::types::{JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};

type Handler = Box<dyn Fn(&JsonRpcRequest) -> RpcOutcome + Send + Sync>;

/// Transport whose responses come from a closure.
pub struct ScriptedTransport {
    handler: Handler,
    requests: Mutex<Vec<JsonRpcRequest>>,
    notifications: Mutex<Vec<JsonRpcNotification>>,
    refuse_notifications: AtomicBool,
    ids: IdGenerator,
    state: StateCell,
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("state", &self.state.get())
            .field("requests", &self.requests.lock().unwrap().len())
            .finish()
    }
}

impl ScriptedTransport {
    /// An unstarted transport answering with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&JsonRpcRequest) -> RpcOutcome + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            refuse_notifications: AtomicBool::new(false),
            ids: IdGenerator::new(),
            state: StateCell::new(),
        }
    }

    /// Like [`ScriptedTransport::new`], already running.
    pub fn running<F>(handler: F) -> Self
    where
        F: Fn(&JsonRpcRequest) -> RpcOutcome + Send + Sync + 'static,
    {
        let t = Self::new(handler);
        t.state.set(TransportState::Running);
        t
    }

    /// Fail every notification with a transport error.
    pub fn refusing_notifications(self) -> Self {
        self.refuse_notifications.store(true, Ordering::SeqCst);
        self
    }

    /// Every request sent so far.
    pub fn requests(&self) -> Vec<JsonRpcRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Methods of every request sent so far, in order.
    pub fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    /// Every notification sent so far.
    pub fn notifications(&self) -> Vec<JsonRpcNotification> {
        self.notifications.lock().unwrap().clone()
    }
}

/// Success outcome answering `request`.
pub fn ok(request: &JsonRpcRequest, result: Value) -> RpcOutcome {
    RpcOutcome::Success {
        id: request.id.clone(),
        result,
    }
}

/// Server-error outcome answering `request`.
pub fn err(request: &JsonRpcRequest, code: i64, message: &str) -> RpcOutcome {
    RpcOutcome::ProtocolError {
        id: Some(request.id.clone()),
        error: JsonRpcError::new(code, message),
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    async fn start(&self) -> Result<()> {
        self.state.set(TransportState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state.get() != TransportState::Unstarted {
            self.state.set(TransportState::Stopped);
        }
        Ok(())
    }

    async fn send_request(&self, request: JsonRpcRequest) -> RpcOutcome {
        if self.state.get() != TransportState::Running {
            return RpcOutcome::not_started(Some(request.id));
        }
        let outcome = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        outcome
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        if self.state.get() != TransportState::Running {
            return Err(ConformanceError::NotStarted.into());
        }
        if self.refuse_notifications.load(Ordering::SeqCst) {
            return Err(ConformanceError::McpTransport("notification refused".into()).into());
        }
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }

    async fn send_batch(&self, batch: Vec<JsonRpcMessage>) -> Vec<RpcOutcome> {
        let mut outcomes = Vec::new();
        for message in batch {
            match message {
                JsonRpcMessage::Request(r) => outcomes.push(self.send_request(r).await),
                JsonRpcMessage::Notification(n) => {
                    let _ = self.send_notification(n).await;
                }
            }
        }
        outcomes
    }

    async fn is_alive(&self) -> bool {
        self.state.get() == TransportState::Running
    }

    fn next_id(&self) -> RequestId {
        self.ids.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_requests_and_uses_handler() {
        let t = ScriptedTransport::running(|req| ok(req, json!({"echo": req.method})));
        let outcome = t.call("ping", json!({})).await;
        assert_eq!(outcome.into_result().unwrap(), json!({"echo": "ping"}));
        assert_eq!(t.methods(), vec!["ping".to_string()]);
    }

    #[tokio::test]
    async fn test_unstarted_refuses() {
        let t = ScriptedTransport::new(|req| ok(req, json!({})));
        assert!(t.call("ping", json!({})).await.is_transport_fault());
        assert!(t.requests().is_empty());
    }
}
