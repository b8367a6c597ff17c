//! The host gateway ABI consumed by the proxy core.
//!
//! The core performs no I/O of its own: every observable effect goes through
//! [`Host`]. Embedders implement it once per request; the reference
//! standalone server and the test mock are the two in-tree implementations.

use thiserror::Error;

/// Pseudo-headers the proxy may rewrite. `:scheme` is managed by the host
/// and deliberately not representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoHeader {
    Method,
    Path,
    Authority,
}

impl PseudoHeader {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Method => ":method",
            Self::Path => ":path",
            Self::Authority => ":authority",
        }
    }
}

/// An outbound HTTP call the host performs on the proxy's behalf.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout_ms: u64,
}

/// Completion of an outbound call, delivered back through
/// [`crate::McpProxy::on_backend_response`].
#[derive(Debug, Clone)]
pub enum BackendOutcome {
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// The per-call timeout expired.
    TimedOut,
    /// Connection-level failure (DNS, reset, TLS, ...).
    TransportFailed(String),
}

impl BackendOutcome {
    /// Convenience constructor for test hosts and simple embedders.
    #[must_use]
    pub fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Self {
        Self::Response {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body: body.to_vec(),
        }
    }
}

/// A reply synthesized by the proxy in lieu of forwarding, to be sent to the
/// client by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl LocalReply {
    /// A 200 response carrying a JSON-RPC frame.
    #[must_use]
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json; charset=utf-8"),
            body,
        }
    }

    /// The 202 no-body ACK for notifications.
    #[must_use]
    pub const fn accepted() -> Self {
        Self {
            status: 202,
            content_type: None,
            body: Vec::new(),
        }
    }
}

/// Verdict of a header-phase hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVerdict {
    Continue,
    /// Stop iterating this header phase (a terminal frame was injected).
    StopIteration,
}

/// Verdict of the request-body hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyVerdict {
    /// Let the (possibly rewritten) request propagate upstream.
    Continue,
    /// Suspend the request; a backend callback will produce the reply.
    Pause,
    /// Answer the client locally without contacting any upstream route.
    Reply(LocalReply),
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("response body already ended")]
    ResponseEnded,
    #[error("outbound call rejected: {0}")]
    CallRejected(String),
}

/// Operations the host gateway offers to the embedded proxy.
///
/// A single request's hook invocations and backend completions are
/// serialized by the host; implementations need no internal locking.
pub trait Host {
    fn get_request_header(&self, name: &str) -> Option<String>;
    fn set_request_header(&mut self, name: &str, value: &str);
    fn remove_request_header(&mut self, name: &str);
    fn all_request_headers(&self) -> Vec<(String, String)>;
    fn replace_request_pseudo_header(&mut self, pseudo: PseudoHeader, value: &str);

    fn get_response_header(&self, name: &str) -> Option<String>;
    fn replace_response_header(&mut self, name: &str, value: &str);
    fn remove_response_header(&mut self, name: &str);

    /// Stop forwarding backend response bytes downstream; the proxy will
    /// inject the client-visible body itself.
    fn pause_streaming_response(&mut self);

    /// Replace the downstream body with the given bytes. After a call with
    /// `end_stream == true` further injections fail.
    ///
    /// # Errors
    ///
    /// [`HostError::ResponseEnded`] when the stream was already closed.
    fn inject_encoded_response_body(
        &mut self,
        body: &[u8],
        end_stream: bool,
    ) -> Result<(), HostError>;

    /// Issue an HTTP call independent of the routed request.
    ///
    /// # Errors
    ///
    /// [`HostError::CallRejected`] when the host cannot dispatch the call.
    fn side_call(&mut self, call: OutboundCall) -> Result<(), HostError>;

    /// Like [`Host::side_call`], but dispatched through the current route.
    ///
    /// # Errors
    ///
    /// [`HostError::CallRejected`] when the host cannot dispatch the call.
    fn route_call(&mut self, call: OutboundCall) -> Result<(), HostError>;

    fn set_property(&mut self, name: &str, value: &str);
    fn get_property(&self, name: &str) -> Option<String>;
}
