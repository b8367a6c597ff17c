//! Per-request state carried across gateway phases.
//!
//! The gateway invokes the proxy through discrete hooks with no shared
//! stack, so everything a later phase needs lives here: the client's opaque
//! id, the transport state machines, buffered stream bytes, and a generic
//! keyed store for loosely typed extras.

use crate::jsonrpc::RequestId;
use edgeline_sse_codec::EventDecoder;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};

/// Well-known keys in the [`ContextStore`].
pub mod keys {
    /// The client's `MCP-Protocol-Version` header (informational).
    pub const PROTOCOL_VERSION: &str = "mcp_protocol_version";
    /// `Mcp-Session-Id` offered by the client (informational).
    pub const CLIENT_SESSION_ID: &str = "mcp_client_session_id";
    /// Name of the tool being called (`tools/call` only).
    pub const TOOL_NAME: &str = "mcp_tool_name";
}

/// Generic per-request keyed storage (opaque values, typed at the edges).
#[derive(Default)]
pub struct ContextStore {
    slots: HashMap<&'static str, Box<dyn Any + Send>>,
}

impl ContextStore {
    pub fn set<T: Any + Send>(&mut self, key: &'static str, value: T) {
        self.slots.insert(key, Box::new(value));
    }

    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.slots.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Remove and return the value; a type mismatch leaves it in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.slots.get(key)?.is::<T>() {
            return None;
        }
        self.slots
            .remove(key)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }
}

/// StreamableHTTP exchange position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpState {
    #[default]
    Idle,
    Initialize,
    Notify,
    Tool,
    Done,
    Failed,
}

/// SSE exchange position (see the protocol state table in the SSE driver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SseState {
    #[default]
    None,
    WaitEndpoint,
    SendingInit,
    WaitInitResp,
    SendingNotify,
    WaitNotifyResp,
    SendingTool,
    WaitToolResp,
    Done,
    Failed,
}

impl SseState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Purpose of the single outstanding backend call, if any.
///
/// Backend calls from one request are strictly serialized, so the pending
/// purpose is a scalar, not a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCall {
    HttpInitialize,
    HttpNotify,
    HttpTool,
    SseInitialize,
    SseNotify,
    SseTool,
}

/// Authentication resolved for the current tool call.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAuth {
    /// Scheme id applied to backend calls.
    pub scheme_id: Option<String>,
    /// Credential from the tool's `requestTemplate.security`; wins over
    /// everything else.
    pub explicit_credential: Option<String>,
    /// Credential lifted from the client request headers.
    pub passthrough_credential: Option<String>,
}

/// All mutable state of one proxied request. Single-owner: the request task.
#[derive(Default)]
pub struct RequestContext {
    /// The client's request id exactly as received.
    pub id: Option<RequestId>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub auth: ResolvedAuth,
    /// Parsed `x-envoy-allow-mcp-tools` override, if the header was present.
    pub allow_tools_header: Option<HashSet<String>>,
    /// Client request headers preserved for reuse on derived backend calls.
    pub saved_headers: Vec<(String, String)>,
    /// `Mcp-Session-Id` returned by the backend initialize response.
    pub session_id: Option<String>,

    pub http_state: HttpState,
    pub sse_state: SseState,
    /// Streamed bytes not yet consumed by the event parser.
    pub sse_decoder: EventDecoder,
    /// Absolute URL derived from the backend's first `endpoint` event.
    pub sse_endpoint_url: Option<url::Url>,
    /// A correlated `message` event that arrived while a sidecall was still
    /// in flight; replayed once the sidecall acknowledges.
    pub deferred_message: Option<Value>,

    pub pending: Option<PendingCall>,
    /// Exactly one final frame is delivered per request.
    pub replied: bool,

    pub store: ContextStore,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_tool_method(&self) -> bool {
        matches!(
            self.method.as_deref(),
            Some(crate::jsonrpc::METHOD_TOOLS_LIST | crate::jsonrpc::METHOD_TOOLS_CALL)
        )
    }
}
