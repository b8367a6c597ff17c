//! Gateway-embedded MCP proxy core.
//!
//! Exposes a single MCP endpoint to clients and delegates `tools/list` /
//! `tools/call` to a backend MCP server over one of two transports:
//!
//! - **StreamableHTTP**: one POST per JSON-RPC call; the reply rides the
//!   same HTTP transaction as JSON or a short event stream.
//! - **SSE**: the inbound client POST is rewritten into a long-lived GET;
//!   an `endpoint` event announces where frames are POSTed and replies come
//!   back on the stream as `message` events.
//!
//! The core performs no I/O: an embedding gateway implements [`Host`] and
//! drives one [`McpProxy`] per request through its lifecycle hooks. See the
//! `edgeline-proxyd` crate for a standalone reference host.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod host;
pub mod jsonrpc;
pub mod response;
mod serde_helpers;
pub mod sse;
pub mod streamable_http;
pub mod tools;

pub use config::{ProxyConfig, Transport};
pub use context::{RequestContext, SseState};
pub use error::{ErrorKind, ProxyError};
pub use hooks::McpProxy;
pub use host::{
    BackendOutcome, BodyVerdict, HeaderVerdict, Host, HostError, LocalReply, OutboundCall,
    PseudoHeader,
};
pub use jsonrpc::RequestId;
