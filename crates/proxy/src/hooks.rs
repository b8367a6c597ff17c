//! Lifecycle hooks: the entry points the host gateway calls per phase.
//!
//! One [`McpProxy`] instance exists per client request and is driven through
//! request-headers, request-body, response-headers, zero or more streaming
//! response-body invocations, and backend-call completions. Invocations for
//! one request are serialized by the host.

use crate::config::{ProxyConfig, Transport};
use crate::context::{PendingCall, RequestContext, ResolvedAuth, SseState, keys};
use crate::error::{ErrorKind, ProxyError};
use crate::filter;
use crate::host::{BackendOutcome, BodyVerdict, HeaderVerdict, Host, LocalReply};
use crate::jsonrpc::{self, METHOD_TOOLS_CALL, RequestId};
use crate::{auth, sse, streamable_http};
use serde_json::Value;
use std::sync::Arc;

/// Per-request tool allow-list override.
pub const ALLOW_TOOLS_HEADER: &str = "x-envoy-allow-mcp-tools";
/// Client protocol version hint (informational).
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
/// Host property carrying the step tag of the produced reply.
pub const DEBUG_PROPERTY: &str = "mcp_proxy_debug";

/// The per-request proxy state machine.
pub struct McpProxy {
    config: Arc<ProxyConfig>,
    ctx: RequestContext,
}

impl McpProxy {
    #[must_use]
    pub fn new(config: Arc<ProxyConfig>) -> Self {
        Self {
            config,
            ctx: RequestContext::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Request-headers phase: record selected headers; never pauses.
    pub fn on_request_headers(&mut self, host: &mut dyn Host) -> HeaderVerdict {
        if let Some(raw) = host.get_request_header(ALLOW_TOOLS_HEADER) {
            self.ctx.allow_tools_header = filter::parse_allow_tools_header(&raw);
            host.remove_request_header(ALLOW_TOOLS_HEADER);
        }
        if let Some(version) = host.get_request_header(PROTOCOL_VERSION_HEADER) {
            if !jsonrpc::SUPPORTED_PROTOCOL_VERSIONS.contains(&version.as_str()) {
                tracing::debug!(version = %version, "client advertises unknown protocol version");
            }
            self.ctx.store.set(keys::PROTOCOL_VERSION, version);
        }
        if let Some(session) = host.get_request_header(streamable_http::MCP_SESSION_HEADER) {
            self.ctx.store.set(keys::CLIENT_SESSION_ID, session);
        }
        HeaderVerdict::Continue
    }

    /// Request-body phase: parse, gate, and dispatch by transport.
    pub fn on_request_body(&mut self, host: &mut dyn Host, body: &[u8]) -> BodyVerdict {
        let request = match jsonrpc::parse_request(body) {
            Ok(request) => request,
            Err(e) => return self.error_reply(host, None, &e),
        };

        // Notifications are acknowledged locally with no body and no backend
        // interaction, whatever their method.
        if request.is_notification() {
            host.set_property(DEBUG_PROPERTY, "mcp-proxy:notification:ack");
            return BodyVerdict::Reply(LocalReply::accepted());
        }

        if !matches!(
            request.method.as_str(),
            jsonrpc::METHOD_TOOLS_LIST | jsonrpc::METHOD_TOOLS_CALL
        ) {
            let err = ProxyError::new(
                ErrorKind::MethodNotFound,
                "mcp-proxy:request:method_not_found",
                format!("method not found: {}", request.method),
            );
            return self.error_reply(host, request.id.as_ref(), &err);
        }

        let id = request.id.clone();
        self.ctx.id = request.id;
        self.ctx.method = Some(request.method.clone());
        self.ctx.params = request.params.clone();
        self.ctx.saved_headers = host.all_request_headers();

        let tool_name = if request.method == METHOD_TOOLS_CALL {
            match self.record_tool_call(host, &request.params) {
                Ok(name) => Some(name),
                Err(e) => return self.error_reply(host, id.as_ref(), &e),
            }
        } else {
            None
        };

        self.resolve_auth(tool_name.as_deref());

        let started = match self.config.server.transport {
            Transport::Http => {
                streamable_http::start(&self.config, &mut self.ctx, host).map(|()| BodyVerdict::Pause)
            }
            Transport::Sse => {
                sse::start_channel(&self.config, &mut self.ctx, host).map(|()| BodyVerdict::Continue)
            }
        };
        match started {
            Ok(verdict) => verdict,
            Err(e) => self.error_reply(host, id.as_ref(), &e),
        }
    }

    /// Response-headers phase: only meaningful once an SSE channel is open.
    pub fn on_response_headers(&mut self, host: &mut dyn Host) -> HeaderVerdict {
        if self.ctx.sse_state == SseState::None {
            return HeaderVerdict::Continue;
        }
        sse::on_response_headers(&mut self.ctx, host)
    }

    /// Streaming response-body phase. Returns the bytes to forward
    /// downstream: empty while an SSE exchange is in flight (the final frame
    /// is injected instead), the chunk itself when no SSE channel exists.
    pub fn on_response_body_chunk(
        &mut self,
        host: &mut dyn Host,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Vec<u8> {
        if self.ctx.sse_state == SseState::None {
            return chunk.to_vec();
        }
        let config = Arc::clone(&self.config);
        sse::on_stream_chunk(&config, &mut self.ctx, host, chunk, end_of_stream);
        Vec::new()
    }

    /// Completion callback for the single outstanding backend call. The
    /// returned reply, if any, is the final client response (StreamableHTTP
    /// path only; the SSE path replies via body injection).
    pub fn on_backend_response(
        &mut self,
        host: &mut dyn Host,
        outcome: BackendOutcome,
    ) -> Option<LocalReply> {
        let Some(pending) = self.ctx.pending.take() else {
            tracing::warn!("backend completion with no outstanding call; dropping");
            return None;
        };

        let config = Arc::clone(&self.config);
        match pending {
            PendingCall::HttpInitialize | PendingCall::HttpNotify | PendingCall::HttpTool => {
                match streamable_http::on_backend_response(
                    &config,
                    &mut self.ctx,
                    host,
                    pending,
                    outcome,
                ) {
                    Ok(Some(reply)) => {
                        self.ctx.replied = true;
                        host.set_property(DEBUG_PROPERTY, self.success_tag());
                        Some(reply)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        self.ctx.http_state = crate::context::HttpState::Failed;
                        Some(self.build_error_reply(host, &e))
                    }
                }
            }
            PendingCall::SseInitialize | PendingCall::SseNotify | PendingCall::SseTool => {
                sse::on_backend_response(&config, &mut self.ctx, host, pending, outcome);
                None
            }
        }
    }

    /// Host-initiated cancellation: the context is dropped; any in-flight
    /// callback for this request becomes a no-op on the host side.
    pub fn on_cancel(&mut self) {
        self.ctx.pending = None;
        if !self.ctx.sse_state.is_terminal() {
            self.ctx.sse_state = SseState::Failed;
        }
    }

    /// Validate `tools/call` params, set diagnostics properties, and enforce
    /// the configured tool catalog when one is declared.
    fn record_tool_call(
        &mut self,
        host: &mut dyn Host,
        params: &Option<Value>,
    ) -> Result<String, ProxyError> {
        let name = params
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            return Err(ProxyError::new(
                ErrorKind::InvalidParams,
                "mcp-proxy:tools/call:missing_name",
                "missing tool name",
            ));
        }

        host.set_property("mcp_server_name", &self.config.server.name);
        host.set_property("mcp_tool_name", &name);
        self.ctx.store.set(keys::TOOL_NAME, name.clone());

        if !self.config.tools.is_empty() && self.config.tool(&name).is_none() {
            return Err(ProxyError::new(
                ErrorKind::InvalidParams,
                "mcp-proxy:tools/call:unknown_tool",
                format!("tool not found: {name}"),
            ));
        }
        Ok(name)
    }

    /// Resolve the security scheme for this call: per-tool override first,
    /// then the server-wide upstream default; the passthrough credential is
    /// lifted from the client headers via the downstream scheme.
    fn resolve_auth(&mut self, tool_name: Option<&str>) {
        let Some(upstream) = self.config.upstream_security_for(tool_name) else {
            self.ctx.auth = ResolvedAuth::default();
            return;
        };

        let mut resolved = ResolvedAuth {
            scheme_id: Some(upstream.id.clone()),
            explicit_credential: upstream.credential.clone(),
            passthrough_credential: None,
        };
        if let Some(downstream) = self.config.downstream_scheme_for(upstream) {
            resolved.passthrough_credential =
                auth::extract_passthrough(&self.ctx.saved_headers, downstream);
        }
        self.ctx.auth = resolved;
    }

    fn success_tag(&self) -> &'static str {
        if self.ctx.method.as_deref() == Some(jsonrpc::METHOD_TOOLS_LIST) {
            "mcp-proxy:tools/list:success"
        } else {
            "mcp-proxy:tools/call:success"
        }
    }

    fn error_reply(
        &mut self,
        host: &mut dyn Host,
        id: Option<&RequestId>,
        err: &ProxyError,
    ) -> BodyVerdict {
        tracing::warn!(error = %err, tag = err.tag, "request failed locally");
        host.set_property(DEBUG_PROPERTY, err.tag);
        self.ctx.replied = true;
        BodyVerdict::Reply(LocalReply::json(jsonrpc::error_frame_for(id, err)))
    }

    fn build_error_reply(&mut self, host: &mut dyn Host, err: &ProxyError) -> LocalReply {
        tracing::warn!(error = %err, tag = err.tag, "backend exchange failed");
        host.set_property(DEBUG_PROPERTY, err.tag);
        self.ctx.replied = true;
        LocalReply::json(jsonrpc::error_frame_for(self.ctx.id.as_ref(), err))
    }
}
