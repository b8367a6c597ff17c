//! JSON-RPC 2.0 framing for the client edge and the backend handshake.
//!
//! Inbound client frames are parsed into [`Request`]; outbound frames are
//! built as raw bytes. The client's `id` is captured as an opaque tagged
//! value ([`RequestId`]) so that `7` round-trips as a number and `"7"` as a
//! string, never coerced.

use crate::error::{ErrorKind, ProxyError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const VERSION: &str = "2.0";

/// Protocol version the proxy advertises when initializing the backend.
pub const ADVERTISED_PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions the proxy accepts from clients (informational).
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];

/// JSON-RPC ids the proxy assigns to its own backend calls. Only the
/// outermost client id is ever propagated back to the client.
pub const BACKEND_INIT_ID: i64 = 1;
pub const BACKEND_TOOL_ID: i64 = 2;

pub mod code {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// A client request id, preserved with its original JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// True when this id equals the given integer (used to correlate the
    /// proxy's own backend ids 1 and 2).
    #[must_use]
    pub fn is_number(&self, n: i64) -> bool {
        matches!(self, Self::Number(v) if *v == n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A parsed inbound frame. `id == None` marks a notification.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Parse a client body into a JSON-RPC request or notification.
///
/// # Errors
///
/// `ParseError` when the body is not JSON; `InvalidRequest` when it is JSON
/// but not a valid JSON-RPC 2.0 frame.
pub fn parse_request(body: &[u8]) -> Result<Request, ProxyError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        ProxyError::new(
            ErrorKind::ParseError,
            "mcp-proxy:request:parse_error",
            format!("invalid json: {e}"),
        )
    })?;

    let invalid = |message: &str| {
        ProxyError::new(
            ErrorKind::InvalidRequest,
            "mcp-proxy:request:invalid_request",
            message,
        )
    };

    let Value::Object(obj) = value else {
        return Err(invalid("request must be a JSON object"));
    };
    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == VERSION => {}
        _ => return Err(invalid("jsonrpc must be \"2.0\"")),
    }

    // An explicit `null` id is treated like an absent one: the frame is a
    // notification and produces no response.
    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<RequestId>(raw.clone())
                .map_err(|_| invalid("id must be a string or an integer"))?,
        ),
    };

    let method = match obj.get("method") {
        Some(Value::String(m)) => m.clone(),
        _ => return Err(invalid("method must be a string")),
    };

    Ok(Request {
        id,
        method,
        params: obj.get("params").cloned(),
    })
}

/// Build a success frame echoing the client's opaque id.
#[must_use]
pub fn success_frame(id: &RequestId, result: &Value) -> Vec<u8> {
    let frame = json!({
        "jsonrpc": VERSION,
        "id": id,
        "result": result,
    });
    serde_json::to_vec(&frame).unwrap_or_default()
}

/// Build an error frame. `id == None` emits `"id": null` (parse errors).
#[must_use]
pub fn error_frame(id: Option<&RequestId>, error_code: i32, message: &str) -> Vec<u8> {
    let frame = json!({
        "jsonrpc": VERSION,
        "id": id,
        "error": { "code": error_code, "message": message },
    });
    serde_json::to_vec(&frame).unwrap_or_default()
}

/// Build an error frame from a [`ProxyError`].
#[must_use]
pub fn error_frame_for(id: Option<&RequestId>, err: &ProxyError) -> Vec<u8> {
    error_frame(id, err.json_rpc_code(), &err.message)
}

/// `initialize` request body sent to the backend (`id: 1`).
#[must_use]
pub fn initialize_request() -> Vec<u8> {
    let frame = json!({
        "jsonrpc": VERSION,
        "id": BACKEND_INIT_ID,
        "method": METHOD_INITIALIZE,
        "params": {
            "protocolVersion": ADVERTISED_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "edgeline-mcp-proxy",
                "version": env!("CARGO_PKG_VERSION"),
            },
        },
    });
    serde_json::to_vec(&frame).unwrap_or_default()
}

/// `notifications/initialized` body (no id).
#[must_use]
pub fn initialized_notification() -> Vec<u8> {
    let frame = json!({
        "jsonrpc": VERSION,
        "method": METHOD_INITIALIZED,
    });
    serde_json::to_vec(&frame).unwrap_or_default()
}

/// The forwarded tool request (`tools/list` or `tools/call`, `id: 2`).
#[must_use]
pub fn backend_tool_request(method: &str, params: &Value) -> Vec<u8> {
    let frame = json!({
        "jsonrpc": VERSION,
        "id": BACKEND_TOOL_ID,
        "method": method,
        "params": params,
    });
    serde_json::to_vec(&frame).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_id_round_trips_as_number() {
        let req = parse_request(br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Number(7)));

        let frame = success_frame(req.id.as_ref().unwrap(), &json!({"tools": []}));
        let out: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(out["id"], json!(7));
    }

    #[test]
    fn string_id_round_trips_as_string() {
        let req = parse_request(br#"{"jsonrpc":"2.0","id":"abc","method":"tools/list"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::String("abc".to_string())));

        let frame = success_frame(req.id.as_ref().unwrap(), &json!({}));
        let out: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(out["id"], json!("abc"));
    }

    #[test]
    fn zero_id_is_a_request_not_a_notification() {
        let req = parse_request(br#"{"jsonrpc":"2.0","id":0,"method":"tools/list"}"#).unwrap();
        assert!(!req.is_notification());
        assert!(req.id.as_ref().unwrap().is_number(0));
    }

    #[test]
    fn absent_id_is_a_notification() {
        let req = parse_request(
            br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = parse_request(b"{not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert_eq!(err.json_rpc_code(), code::PARSE_ERROR);
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let err = parse_request(br#"{"jsonrpc":"1.0","id":1,"method":"m"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn fractional_id_is_invalid_request() {
        let err = parse_request(br#"{"jsonrpc":"2.0","id":1.5,"method":"m"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn error_frame_with_no_id_emits_null() {
        let frame = error_frame(None, code::PARSE_ERROR, "invalid json");
        let out: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(out["id"], Value::Null);
        assert_eq!(out["error"]["code"], json!(-32700));
    }

    #[test]
    fn initialize_request_advertises_fixed_protocol_version() {
        let body: Value = serde_json::from_slice(&initialize_request()).unwrap();
        assert_eq!(body["id"], json!(1));
        assert_eq!(body["method"], json!("initialize"));
        assert_eq!(
            body["params"]["protocolVersion"],
            json!(ADVERTISED_PROTOCOL_VERSION)
        );
    }

    #[test]
    fn initialized_notification_has_no_id() {
        let body: Value = serde_json::from_slice(&initialized_notification()).unwrap();
        assert!(body.get("id").is_none());
        assert_eq!(body["method"], json!("notifications/initialized"));
    }

    #[test]
    fn backend_tool_request_uses_id_two() {
        let body: Value =
            serde_json::from_slice(&backend_tool_request("tools/list", &json!({}))).unwrap();
        assert_eq!(body["id"], json!(2));
    }
}
