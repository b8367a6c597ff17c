use crate::jsonrpc::code;
use thiserror::Error;

/// Failure classes observable at the client edge.
///
/// Every kind maps to a JSON-RPC error code; the distinction beyond the code
/// is carried in the message and the debug tag set as a host property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client body is not valid JSON.
    ParseError,
    /// JSON parsed but is not a valid JSON-RPC 2.0 frame.
    InvalidRequest,
    /// Unknown method on a non-notification.
    MethodNotFound,
    /// Malformed params, or the backend rejected our protocol version.
    InvalidParams,
    /// No credential available for the required security scheme.
    AuthMissing,
    /// Non-2xx from a backend call.
    BackendHttp,
    /// Backend body unparseable.
    BackendParse,
    /// SSE channel answered with a non-`text/event-stream` content type.
    ContentType,
    /// SSE accumulator exceeded the hard cap without a dispatchable event.
    BufferOverflow,
    /// Backend call exceeded the configured timeout.
    Timeout,
    /// Invariant violation or unusable runtime state (should not happen with
    /// a validated config).
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => code::PARSE_ERROR,
            Self::InvalidRequest => code::INVALID_REQUEST,
            Self::MethodNotFound => code::METHOD_NOT_FOUND,
            Self::InvalidParams => code::INVALID_PARAMS,
            Self::AuthMissing
            | Self::BackendHttp
            | Self::BackendParse
            | Self::ContentType
            | Self::BufferOverflow
            | Self::Timeout
            | Self::Internal => code::INTERNAL_ERROR,
        }
    }
}

/// A proxy-side failure, tagged with the step that produced it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
    /// Step identifier surfaced via host properties, e.g.
    /// `mcp-proxy:initialize:backend_error`.
    pub tag: &'static str,
}

impl ProxyError {
    #[must_use]
    pub fn new(kind: ErrorKind, tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tag,
        }
    }

    #[must_use]
    pub fn backend_http(tag: &'static str, status: u16) -> Self {
        Self::new(
            ErrorKind::BackendHttp,
            tag,
            format!("backend returned status {status}"),
        )
    }

    #[must_use]
    pub const fn json_rpc_code(&self) -> i32 {
        self.kind.code()
    }
}
