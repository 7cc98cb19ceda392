//! JSON-RPC framing: id assignment, message encoding, response parsing
//!
//! Every transport shares this module so that request ids, line framing, and
//! the classification of inbound bytes behave identically regardless of the
//! medium.
//!
//! # Design
//!
//! - [`IdGenerator`] is owned by exactly one transport instance. Its counter
//!   starts at 1 and is never reset, so ids are never reused for the life of
//!   that instance.
//! - Inbound bytes are never allowed to raise past the transport boundary:
//!   malformed JSON is turned into a locally synthesized `-32700` response
//!   carrying the id of the request that was waiting for it.
//! - [`RpcOutcome`] separates a server's JSON-RPC error (a valid, final answer)
//!   from a transport fault synthesized on this side of the wire, so callers
//!   can `match` instead of inspecting error codes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::error::{ConformanceError, Result};
use crate::mcp::types::{
    JsonRpcError, JsonRpcMessage, JsonRpcResponse, RequestId, INVALID_REQUEST, PARSE_ERROR,
    TRANSPORT_ERROR,
};

/// Message used for the fault returned when a transport is not running.
pub const NOT_STARTED_MESSAGE: &str = "transport not started";

/// Monotonic request-id source scoped to one transport instance.
///
/// # Examples
///
/// ```
/// use mcp_conformance::mcp::framing::IdGenerator;
/// use mcp_conformance::mcp::types::RequestId;
///
/// let ids = IdGenerator::new();
/// assert_eq!(ids.next(), RequestId::Number(1));
/// assert_eq!(ids.next(), RequestId::Number(2));
/// assert_eq!(ids.next_string("req"), RequestId::String("req-3".into()));
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator whose first id is `1`.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Next integer id.
    pub fn next(&self) -> RequestId {
        RequestId::Number(self.bump() as i64)
    }

    /// Next id rendered as `"{prefix}-{n}"`, sharing the integer counter.
    pub fn next_string(&self, prefix: &str) -> RequestId {
        RequestId::String(format!("{}-{}", prefix, self.bump()))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of one request, tagged by who produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// The server answered with a `result`.
    Success {
        /// Id of the originating request.
        id: RequestId,
        /// The `result` member.
        result: Value,
    },
    /// The server answered with an `error` object.
    ProtocolError {
        /// Id of the originating request, when the server echoed one.
        id: Option<RequestId>,
        /// The `error` member.
        error: JsonRpcError,
    },
    /// No usable answer reached this side of the wire; the error was
    /// synthesized locally.
    TransportFault {
        /// Id of the request that was waiting.
        id: Option<RequestId>,
        /// Synthesized error (`-32000` or `-32700`).
        error: JsonRpcError,
    },
}

impl RpcOutcome {
    /// Classify a parsed response object.
    ///
    /// A response carrying both or neither of `result`/`error` is itself a
    /// protocol violation and is reported as a `-32600` protocol error.
    pub fn from_response(response: JsonRpcResponse) -> Self {
        match (response.result, response.error) {
            (Some(result), None) => match response.id {
                Some(id) => RpcOutcome::Success { id, result },
                None => RpcOutcome::ProtocolError {
                    id: None,
                    error: JsonRpcError::new(INVALID_REQUEST, "success response without id")
                        .with_data(result),
                },
            },
            (None, Some(error)) => RpcOutcome::ProtocolError {
                id: response.id,
                error,
            },
            (result, error) => RpcOutcome::ProtocolError {
                id: response.id,
                error: JsonRpcError::new(
                    INVALID_REQUEST,
                    "response must carry exactly one of result or error",
                )
                .with_data(serde_json::json!({
                    "result": result,
                    "error": error,
                })),
            },
        }
    }

    /// Synthesize a `-32000` transport fault.
    pub fn transport_fault(id: Option<RequestId>, message: impl Into<String>) -> Self {
        RpcOutcome::TransportFault {
            id,
            error: JsonRpcError::new(TRANSPORT_ERROR, message),
        }
    }

    /// Synthesize a `-32700` parse fault.
    pub fn parse_fault(id: Option<RequestId>, detail: impl Into<String>) -> Self {
        RpcOutcome::TransportFault {
            id,
            error: JsonRpcError::new(PARSE_ERROR, "Parse error")
                .with_data(Value::String(detail.into())),
        }
    }

    /// The fault every transport returns for a request sent while not running.
    pub fn not_started(id: Option<RequestId>) -> Self {
        Self::transport_fault(id, NOT_STARTED_MESSAGE)
    }

    /// The correlated id, when one is known.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            RpcOutcome::Success { id, .. } => Some(id),
            RpcOutcome::ProtocolError { id, .. } | RpcOutcome::TransportFault { id, .. } => {
                id.as_ref()
            }
        }
    }

    /// True for [`RpcOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RpcOutcome::Success { .. })
    }

    /// True for [`RpcOutcome::TransportFault`].
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, RpcOutcome::TransportFault { .. })
    }

    /// The error object for either failure variant.
    pub fn error(&self) -> Option<&JsonRpcError> {
        match self {
            RpcOutcome::Success { .. } => None,
            RpcOutcome::ProtocolError { error, .. } | RpcOutcome::TransportFault { error, .. } => {
                Some(error)
            }
        }
    }

    /// Wire-shaped view of this outcome, for assertions on raw codes.
    pub fn to_response(&self) -> JsonRpcResponse {
        match self {
            RpcOutcome::Success { id, result } => {
                JsonRpcResponse::success(Some(id.clone()), result.clone())
            }
            RpcOutcome::ProtocolError { id, error } | RpcOutcome::TransportFault { id, error } => {
                JsonRpcResponse::failure(id.clone(), error.clone())
            }
        }
    }

    /// Convert into the `result` value, mapping failures to
    /// [`ConformanceError::Protocol`] or [`ConformanceError::TransportFault`].
    pub fn into_result(self) -> Result<Value> {
        match self {
            RpcOutcome::Success { result, .. } => Ok(result),
            RpcOutcome::ProtocolError { error, .. } => Err(ConformanceError::Protocol(error).into()),
            RpcOutcome::TransportFault { error, .. } => {
                Err(ConformanceError::TransportFault(error).into())
            }
        }
    }
}

/// Serialize one message followed by a single `\n`.
///
/// # Errors
///
/// Returns [`ConformanceError::Serialization`] if the message cannot be
/// serialized.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message).map_err(ConformanceError::Serialization)?;
    line.push('\n');
    Ok(line)
}

/// Parse raw bytes into the outcome for `expected_id`.
///
/// Never fails: malformed JSON and non-response objects become a `-32700`
/// transport fault carrying `expected_id`.
pub fn parse_response(bytes: &[u8], expected_id: Option<&RequestId>) -> RpcOutcome {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => parse_value(value, expected_id),
        Err(e) => RpcOutcome::parse_fault(expected_id.cloned(), e.to_string()),
    }
}

/// Classify an already-parsed JSON value as a response.
pub fn parse_value(value: Value, expected_id: Option<&RequestId>) -> RpcOutcome {
    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(response) => RpcOutcome::from_response(response),
        Err(e) => RpcOutcome::parse_fault(
            expected_id.cloned(),
            format!("invalid response object: {}", e),
        ),
    }
}

/// Parse a batch reply: a JSON array of response objects.
///
/// A body that is not an array yields a single fault, or the single response
/// it contains when the server answered the whole batch with one error (as
/// JSON-RPC allows for an invalid batch).
pub fn parse_batch(bytes: &[u8]) -> Vec<RpcOutcome> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Array(items)) => items.into_iter().map(|v| parse_value(v, None)).collect(),
        Ok(other) => vec![parse_value(other, None)],
        Err(e) => vec![RpcOutcome::parse_fault(None, e.to_string())],
    }
}

/// What a stream-oriented transport should do with one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameDisposition {
    /// The frame answers the request being waited on.
    Matched(RpcOutcome),
    /// The frame belongs to something else and should be skipped.
    Skip(String),
}

/// Decide whether one inbound frame answers `expected_id`.
///
/// Server-initiated requests and notifications are skipped, as are responses
/// carrying a different id (stale answers to requests that already timed
/// out). A response without an id is only accepted when it is a `-32700` or
/// `-32600` error, the two cases where a server cannot know which request it
/// is answering. Any other id-less response (for example a reply to a
/// notification) cannot be attributed and is skipped.
pub fn classify_frame(frame: &str, expected_id: &RequestId) -> FrameDisposition {
    let value: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => {
            return FrameDisposition::Matched(RpcOutcome::parse_fault(
                Some(expected_id.clone()),
                e.to_string(),
            ))
        }
    };

    let is_response = value.get("result").is_some() || value.get("error").is_some();
    if !is_response {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("<none>")
            .to_string();
        return FrameDisposition::Skip(format!("server-initiated message `{}`", method));
    }

    match value.get("id") {
        None | Some(Value::Null) => {
            let code = value
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(Value::as_i64);
            match code {
                Some(PARSE_ERROR) | Some(INVALID_REQUEST) => {
                    FrameDisposition::Matched(parse_value(value, Some(expected_id)))
                }
                _ => FrameDisposition::Skip(format!("unattributable response without id: {}", value)),
            }
        }
        Some(raw) => match serde_json::from_value::<RequestId>(raw.clone()) {
            Ok(id) if &id == expected_id => {
                FrameDisposition::Matched(parse_value(value, Some(expected_id)))
            }
            Ok(id) => FrameDisposition::Skip(format!("response for stale id {}", id)),
            Err(_) => FrameDisposition::Skip(format!("response with unusable id {}", raw)),
        },
    }
}

/// A batch reply re-keyed by request id.
#[derive(Debug, Default)]
pub struct BatchCorrelation {
    /// Outcomes keyed by the id of the request they answer.
    pub responses: HashMap<RequestId, RpcOutcome>,
    /// Request ids in the batch that received no response.
    pub missing: Vec<RequestId>,
    /// Outcomes that matched no request in the batch (including id-less
    /// faults).
    pub unmatched: Vec<RpcOutcome>,
}

/// Correlate a batch reply with the messages that were sent.
///
/// Position in the reply is ignored; only ids matter. Notifications in the
/// batch are expected to produce nothing.
pub fn correlate_batch(sent: &[JsonRpcMessage], outcomes: Vec<RpcOutcome>) -> BatchCorrelation {
    let expected: Vec<&RequestId> = sent.iter().filter_map(JsonRpcMessage::id).collect();
    let mut correlation = BatchCorrelation::default();

    for outcome in outcomes {
        match outcome.id().cloned() {
            Some(id) if expected.contains(&&id) && !correlation.responses.contains_key(&id) => {
                correlation.responses.insert(id, outcome);
            }
            _ => correlation.unmatched.push(outcome),
        }
    }

    correlation.missing = expected
        .into_iter()
        .filter(|id| !correlation.responses.contains_key(*id))
        .cloned()
        .collect();

    correlation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::{JsonRpcNotification, JsonRpcRequest};
    use serde_json::json;

    #[test]
    fn test_id_generator_never_repeats() {
        let ids = IdGenerator::new();
        let a = ids.next();
        let b = ids.next_string("x");
        let c = ids.next();
        assert_eq!(a, RequestId::Number(1));
        assert_eq!(b, RequestId::String("x-2".into()));
        assert_eq!(c, RequestId::Number(3));
    }

    #[test]
    fn test_encode_line_appends_single_newline() {
        let req = JsonRpcRequest::new("t1", "ping", json!({}));
        let line = encode_line(&req).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_parse_response_malformed_synthesizes_parse_error_with_id() {
        let id = RequestId::from("t9");
        let outcome = parse_response(b"{not json", Some(&id));
        assert!(outcome.is_transport_fault());
        assert_eq!(outcome.id(), Some(&id));
        assert_eq!(outcome.error().unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn test_parse_response_success() {
        let outcome = parse_response(br#"{"jsonrpc":"2.0","id":"t1","result":{}}"#, None);
        assert_eq!(
            outcome,
            RpcOutcome::Success {
                id: RequestId::from("t1"),
                result: json!({})
            }
        );
    }

    #[test]
    fn test_from_response_rejects_both_result_and_error() {
        let outcome = parse_value(
            json!({"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}),
            None,
        );
        match outcome {
            RpcOutcome::ProtocolError { error, .. } => assert_eq!(error.code, INVALID_REQUEST),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_server_error_is_protocol_error_not_fault() {
        let outcome = parse_value(
            json!({"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}),
            None,
        );
        assert!(!outcome.is_transport_fault());
        assert!(outcome.error().unwrap().is_method_not_found());
        let err = outcome.into_result().unwrap_err();
        let conf = err.downcast_ref::<ConformanceError>().unwrap();
        assert!(matches!(conf, ConformanceError::Protocol(_)));
    }

    #[test]
    fn test_to_response_round_trips_fault_shape() {
        let outcome = RpcOutcome::not_started(Some(RequestId::Number(4)));
        let resp = outcome.to_response();
        assert_eq!(resp.id, Some(RequestId::Number(4)));
        assert_eq!(resp.error.unwrap().message, NOT_STARTED_MESSAGE);
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_classify_frame_skips_notifications_and_stale_ids() {
        let expected = RequestId::Number(5);
        let notif = r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#;
        assert!(matches!(
            classify_frame(notif, &expected),
            FrameDisposition::Skip(_)
        ));

        let stale = r#"{"jsonrpc":"2.0","id":4,"result":{}}"#;
        assert!(matches!(
            classify_frame(stale, &expected),
            FrameDisposition::Skip(_)
        ));

        let matched = r#"{"jsonrpc":"2.0","id":5,"result":{"ok":true}}"#;
        match classify_frame(matched, &expected) {
            FrameDisposition::Matched(o) => assert!(o.is_success()),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_frame_accepts_null_id_error() {
        let expected = RequestId::Number(6);
        let frame = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#;
        match classify_frame(frame, &expected) {
            FrameDisposition::Matched(RpcOutcome::ProtocolError { error, .. }) => {
                assert_eq!(error.code, PARSE_ERROR)
            }
            other => panic!("expected matched protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_frame_skips_id_less_reply_to_notification() {
        let expected = RequestId::Number(1);
        let stray = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32601,"message":"unknown notification"}}"#;
        assert!(matches!(
            classify_frame(stray, &expected),
            FrameDisposition::Skip(_)
        ));

        let no_id = r#"{"jsonrpc":"2.0","result":{}}"#;
        assert!(matches!(
            classify_frame(no_id, &expected),
            FrameDisposition::Skip(_)
        ));

        let invalid = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        assert!(matches!(
            classify_frame(invalid, &expected),
            FrameDisposition::Matched(RpcOutcome::ProtocolError { .. })
        ));
    }

    #[test]
    fn test_null_result_is_success() {
        let outcome = parse_response(br#"{"jsonrpc":"2.0","id":1,"result":null}"#, None);
        assert_eq!(
            outcome,
            RpcOutcome::Success {
                id: RequestId::Number(1),
                result: Value::Null
            }
        );

        let missing = parse_response(br#"{"jsonrpc":"2.0","id":1}"#, None);
        assert_eq!(missing.error().unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn test_correlate_batch_by_id_not_position() {
        let sent: Vec<JsonRpcMessage> = vec![
            JsonRpcRequest::new(1, "ping", json!({})).into(),
            JsonRpcNotification::new("notifications/initialized", json!({})).into(),
            JsonRpcRequest::new(2, "tools/list", json!({})).into(),
            JsonRpcRequest::new(3, "resources/list", json!({})).into(),
        ];
        let reply = parse_batch(
            br#"[{"jsonrpc":"2.0","id":2,"result":{"tools":[]}},
                {"jsonrpc":"2.0","id":1,"result":{}},
                {"jsonrpc":"2.0","id":99,"result":{}}]"#,
        );

        let correlation = correlate_batch(&sent, reply);
        assert_eq!(correlation.responses.len(), 2);
        assert!(correlation.responses[&RequestId::Number(1)].is_success());
        assert_eq!(correlation.missing, vec![RequestId::Number(3)]);
        assert_eq!(correlation.unmatched.len(), 1);
    }

    #[test]
    fn test_parse_batch_non_array_body() {
        let outcomes = parse_batch(br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"Invalid Request"}}"#);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].error().unwrap().code, INVALID_REQUEST);

        let outcomes = parse_batch(b"garbage");
        assert!(outcomes[0].is_transport_fault());
    }
}
