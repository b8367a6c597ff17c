//! Decoding of backend POST responses and shaping of tool results.
//!
//! A StreamableHTTP backend may answer a POST with a plain JSON body or with
//! a short event stream carrying the reply as a `message` event; both decode
//! to the same JSON-RPC frame here.

use crate::error::{ErrorKind, ProxyError};
use edgeline_sse_codec::EventDecoder;
use serde_json::Value;

/// Decode a backend response body into a JSON-RPC frame.
///
/// # Errors
///
/// `BackendParse` when neither a JSON object nor a decodable event stream
/// frame is found.
pub fn decode_backend_frame(
    content_type: Option<&str>,
    body: &[u8],
    tag: &'static str,
) -> Result<Value, ProxyError> {
    let parse_failed = |detail: String| ProxyError::new(ErrorKind::BackendParse, tag, detail);

    if content_type
        .unwrap_or_default()
        .to_ascii_lowercase()
        .starts_with("text/event-stream")
    {
        let mut decoder = EventDecoder::new();
        let mut events = decoder.feed(body);
        // Tolerate a missing final blank line on the last event.
        events.extend(decoder.feed(b"\n\n"));
        for event in events {
            if !event.is_message() {
                continue;
            }
            if let Ok(frame) = serde_json::from_str::<Value>(&event.data)
                && frame.get("jsonrpc").is_some()
            {
                return Ok(frame);
            }
        }
        return Err(parse_failed(
            "event stream carried no JSON-RPC message".to_string(),
        ));
    }

    let frame: Value = serde_json::from_slice(body)
        .map_err(|e| parse_failed(format!("invalid backend json: {e}")))?;
    if !frame.is_object() {
        return Err(parse_failed("backend frame is not an object".to_string()));
    }
    Ok(frame)
}

/// The `error.code` of a frame, when present.
#[must_use]
pub fn frame_error_code(frame: &Value) -> Option<i64> {
    frame.get("error")?.get("code")?.as_i64()
}

/// The `error.message` of a frame, when present.
#[must_use]
pub fn frame_error_message(frame: &Value) -> Option<&str> {
    frame.get("error")?.get("message")?.as_str()
}

/// Prefix the first text content entry of a failed tool result with
/// `Backend error: `. MCP encodes tool failures inside `result`, so the
/// shaped value still travels in a *success* frame with `isError` intact.
///
/// Returns whether the result was recognized as a backend tool failure.
pub fn wrap_tool_error(result: &mut Value) -> bool {
    if result.get("isError").and_then(Value::as_bool) != Some(true) {
        return false;
    }

    if let Some(content) = result.get_mut("content").and_then(Value::as_array_mut) {
        for entry in content.iter_mut() {
            if entry.get("type").and_then(Value::as_str) != Some("text") {
                continue;
            }
            if let Some(text) = entry.get_mut("text")
                && let Some(original) = text.as_str()
            {
                *text = Value::String(format!("Backend error: {original}"));
            }
            break;
        }
    }
    true
}
