//! Asynchronous tool operations
//!
//! Under protocol `2025-03-26` a tool call tagged `"async": true` may answer
//! with an operation handle instead of a result:
//!
//! ```json
//! {"operationId": "op-7"}
//! ```
//!
//! The client then polls `tools/result {operationId}` until the server
//! reports a terminal status (`completed`, `failed`, `cancelled`) or the
//! client's own deadline passes. `tools/cancel {operationId}` asks the server
//! to abandon the operation; the client stops tracking it whatever the
//! server answers.
//!
//! The deadline is checked before every sleep, so [`poll_until_terminal`]
//! returns no later than `timeout + interval` plus one request round trip.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use crate::error::{ConformanceError, Result};
use crate::mcp::protocol::lock;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    JsonRpcError, OperationHandle, OperationStatus, OperationStatusResponse, INTERNAL_ERROR,
    METHOD_TOOLS_CANCEL, METHOD_TOOLS_RESULT,
};

const LOG_TARGET: &str = "mcp_conformance::mcp::protocol::operations";

/// Client-side view of in-flight operations, keyed by operation id.
#[derive(Debug, Default)]
pub struct OperationTracker {
    ops: Mutex<HashMap<String, OperationStatus>>,
}

impl OperationTracker {
    /// Last known status of `operation_id`.
    pub fn status(&self, operation_id: &str) -> Option<OperationStatus> {
        lock(&self.ops).get(operation_id).copied()
    }

    /// Record `status` for `operation_id`.
    pub fn set(&self, operation_id: &str, status: OperationStatus) {
        lock(&self.ops).insert(operation_id.to_string(), status);
    }

    /// Record `status` unless the operation already reached a terminal state
    /// (for instance a local cancel that raced with a poll).
    pub fn advance(&self, operation_id: &str, status: OperationStatus) {
        let mut ops = lock(&self.ops);
        if let Some(current) = ops.get_mut(operation_id) {
            if !current.is_terminal() {
                *current = status;
            }
        }
    }

    /// Stop tracking `operation_id`.
    pub fn forget(&self, operation_id: &str) -> Option<OperationStatus> {
        lock(&self.ops).remove(operation_id)
    }

    /// Ids still being tracked.
    pub fn in_flight(&self) -> Vec<String> {
        lock(&self.ops).keys().cloned().collect()
    }

    /// Forget every operation.
    pub fn clear(&self) {
        lock(&self.ops).clear();
    }
}

/// Poll cadence and deadline.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Pause between polls.
    pub interval: Duration,
    /// Give up after this long.
    pub timeout: Duration,
}

/// Copy of `params` with `"async": true` added.
///
/// Non-object params are replaced by an object carrying only the tag.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::protocol::operations::tag_async;
/// use serde_json::json;
///
/// assert_eq!(tag_async(json!({"n": 1})), json!({"n": 1, "async": true}));
/// assert_eq!(tag_async(json!(null)), json!({"async": true}));
/// ```
pub fn tag_async(params: Value) -> Value {
    let mut map = match params {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.insert("async".to_string(), Value::Bool(true));
    Value::Object(map)
}

/// The operation handle in a tool result, if the server deferred the call.
pub fn operation_handle(result: &Value) -> Option<OperationHandle> {
    let id = result.get("operationId")?.as_str()?;
    if id.is_empty() {
        return None;
    }
    Some(OperationHandle {
        operation_id: id.to_string(),
    })
}

/// Poll `operation_id` until it finishes, fails, is cancelled, or times out.
///
/// # Errors
///
/// - [`ConformanceError::AsyncFailed`] when the server reports `failed`
/// - [`ConformanceError::AsyncCancelled`] when the server reports
///   `cancelled` or the operation was cancelled locally
/// - [`ConformanceError::AsyncTimeout`] when `settings.timeout` elapses
/// - any error from the `tools/result` request itself
pub async fn poll_until_terminal(
    transport: &dyn Transport,
    tracker: &OperationTracker,
    operation_id: &str,
    settings: PollSettings,
) -> Result<Value> {
    let started = Instant::now();
    let deadline = started + settings.timeout;
    tracker.set(operation_id, OperationStatus::Submitted);
    tracing::debug!(target: LOG_TARGET, operation_id, "polling async operation");

    loop {
        if tracker.status(operation_id).map_or(true, |s| s.is_terminal()) {
            // Cancelled (or forgotten) while this loop was asleep.
            tracker.forget(operation_id);
            return Err(ConformanceError::AsyncCancelled(operation_id.to_string()).into());
        }

        let outcome = transport
            .call(METHOD_TOOLS_RESULT, json!({ "operationId": operation_id }))
            .await;
        let body = match outcome.into_result() {
            Ok(body) => body,
            Err(e) => {
                tracker.forget(operation_id);
                return Err(e);
            }
        };
        let status: OperationStatusResponse = match serde_json::from_value(body) {
            Ok(s) => s,
            Err(e) => {
                tracker.forget(operation_id);
                return Err(ConformanceError::Serialization(e).into());
            }
        };

        match status.status {
            OperationStatus::Completed => {
                tracker.forget(operation_id);
                tracing::debug!(target: LOG_TARGET, operation_id, elapsed = ?started.elapsed(), "operation completed");
                return Ok(status.result.unwrap_or(Value::Null));
            }
            OperationStatus::Failed | OperationStatus::TimedOut => {
                tracker.forget(operation_id);
                let error = status.error.unwrap_or_else(|| {
                    JsonRpcError::new(
                        INTERNAL_ERROR,
                        format!("operation ended with status {}", status.status),
                    )
                });
                return Err(ConformanceError::AsyncFailed {
                    operation_id: operation_id.to_string(),
                    error,
                }
                .into());
            }
            OperationStatus::Cancelled => {
                tracker.forget(operation_id);
                return Err(ConformanceError::AsyncCancelled(operation_id.to_string()).into());
            }
            OperationStatus::Submitted | OperationStatus::Running => {
                tracker.advance(operation_id, OperationStatus::Running);
            }
        }

        if Instant::now() >= deadline {
            tracker.forget(operation_id);
            let elapsed = started.elapsed();
            tracing::warn!(target: LOG_TARGET, operation_id, ?elapsed, "async operation timed out");
            return Err(ConformanceError::AsyncTimeout {
                operation_id: operation_id.to_string(),
                elapsed,
            }
            .into());
        }
        tokio::time::sleep(settings.interval).await;
    }
}

/// Ask the server to cancel `operation_id` and stop tracking it locally.
///
/// The local side is cancelled even when the server rejects the request; the
/// server's answer is still returned so callers can assert on it.
pub async fn cancel_operation(
    transport: &dyn Transport,
    tracker: &OperationTracker,
    operation_id: &str,
) -> Result<()> {
    if tracker.status(operation_id).is_some() {
        tracker.set(operation_id, OperationStatus::Cancelled);
    }
    let outcome = transport
        .call(METHOD_TOOLS_CANCEL, json!({ "operationId": operation_id }))
        .await;
    if let Some(error) = outcome.error() {
        tracing::warn!(target: LOG_TARGET, operation_id, "server rejected cancel: {}", error);
    }
    outcome.into_result().map(|_| ())
}
