//! SSE backend exchange: channel driver and protocol state machine.
//!
//! The inbound client POST is rewritten in place into a GET for the
//! backend's SSE URL so the gateway's native streaming pipeline carries the
//! event stream back to us. The first `endpoint` event announces where
//! JSON-RPC frames are POSTed; replies return on the stream as `message`
//! events correlated by the proxy-chosen ids (1 for initialize, 2 for the
//! tool request). The raw stream is never forwarded: the downstream body is
//! swallowed until the final frame is injected.

use crate::auth;
use crate::config::ProxyConfig;
use crate::context::{PendingCall, RequestContext, SseState};
use crate::error::{ErrorKind, ProxyError};
use crate::host::{BackendOutcome, HeaderVerdict, Host, OutboundCall};
use crate::jsonrpc::{self, code};
use crate::streamable_http::{MCP_SESSION_HEADER, header_value, is_success};
use edgeline_sse_codec::Event;
use serde_json::{Value, json};
use url::Url;

/// Hard cap on bytes accumulated without producing a dispatchable event.
pub const MAX_BUFFERED_BYTES: usize = 100 * 1024 * 1024;

const ENDPOINT_EVENT: &str = "endpoint";

/// Rewrite the current client POST into the backend SSE GET (request-body
/// time). The request is not paused; the mutated request propagates and the
/// stream comes back through the response hooks.
pub(crate) fn start_channel(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
) -> Result<(), ProxyError> {
    let mut url = backend_url(config)?;

    let mut auth_headers = Vec::new();
    auth::apply_resolved(config, &ctx.auth, &mut auth_headers, &mut url)?;

    host.replace_request_pseudo_header(crate::host::PseudoHeader::Method, "GET");
    if let Some(authority) = authority_of(&url) {
        host.replace_request_pseudo_header(crate::host::PseudoHeader::Authority, &authority);
    }
    host.replace_request_pseudo_header(crate::host::PseudoHeader::Path, &path_and_query(&url));

    for name in ["content-type", "content-length", "transfer-encoding", "accept"] {
        host.remove_request_header(name);
    }
    host.set_request_header("accept", "text/event-stream");
    for (name, value) in &auth_headers {
        host.set_request_header(name, value);
    }

    ctx.sse_state = SseState::WaitEndpoint;
    Ok(())
}

/// Response-headers time: enforce the stream content type and take over the
/// downstream body.
pub(crate) fn on_response_headers(
    ctx: &mut RequestContext,
    host: &mut dyn Host,
) -> HeaderVerdict {
    let content_type = host.get_response_header("content-type").unwrap_or_default();
    let is_event_stream = content_type
        .to_ascii_lowercase()
        .starts_with("text/event-stream");

    // Whatever happens next, the client sees a JSON frame, not a stream.
    host.replace_response_header(":status", "200");
    host.remove_response_header("content-length");
    host.replace_response_header("content-type", "application/json; charset=utf-8");

    if !is_event_stream {
        fail(
            ctx,
            host,
            &ProxyError::new(
                ErrorKind::ContentType,
                "mcp-proxy:sse:content_type",
                format!("backend answered with content-type '{content_type}'"),
            ),
        );
        return HeaderVerdict::StopIteration;
    }

    host.pause_streaming_response();
    HeaderVerdict::Continue
}

/// Streaming response-body time: absorb a chunk, drain events, step the
/// machine. The return bytes for downstream are always empty; the final
/// frame travels via body injection.
pub(crate) fn on_stream_chunk(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    chunk: &[u8],
    end_of_stream: bool,
) {
    if ctx.sse_state.is_terminal() {
        return;
    }

    if ctx.sse_decoder.buffered_len().saturating_add(chunk.len()) > MAX_BUFFERED_BYTES {
        fail(
            ctx,
            host,
            &ProxyError::new(
                ErrorKind::BufferOverflow,
                "mcp-proxy:sse:buffer_overflow",
                "event stream exceeded the 100 MiB accumulation cap",
            ),
        );
        return;
    }

    let events = ctx.sse_decoder.feed(chunk);
    for event in events {
        dispatch_event(config, ctx, host, &event);
        if ctx.sse_state.is_terminal() {
            return;
        }
    }

    if end_of_stream && !ctx.sse_state.is_terminal() {
        fail(
            ctx,
            host,
            &ProxyError::new(
                ErrorKind::Internal,
                "mcp-proxy:sse:stream_closed",
                "event stream ended before the tool response arrived",
            ),
        );
    }
}

/// Completion of one of the three sidecall POSTs.
pub(crate) fn on_backend_response(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    pending: PendingCall,
    outcome: BackendOutcome,
) {
    match pending {
        PendingCall::SseInitialize => match ack_status(outcome) {
            Ok((status, headers)) if is_success(status) => {
                if let Some(session) = header_value(&headers, MCP_SESSION_HEADER) {
                    ctx.session_id = Some(session);
                }
                ctx.sse_state = SseState::WaitInitResp;
                replay_deferred(config, ctx, host);
            }
            Ok((status, _)) => fail(
                ctx,
                host,
                &ProxyError::backend_http("mcp-proxy:initialize:backend_error", status),
            ),
            Err(e) => fail(ctx, host, &e),
        },
        PendingCall::SseNotify => {
            match ack_status(outcome) {
                Ok((status, _)) if is_success(status) => {}
                Ok((status, _)) => {
                    tracing::warn!(status, "initialized notification rejected by backend");
                }
                Err(e) => tracing::warn!(error = %e, "initialized notification failed"),
            }
            // No stream event is expected for the notify; go straight to the
            // tool request.
            send_tool_request(config, ctx, host);
        }
        PendingCall::SseTool => match ack_status(outcome) {
            Ok((status, _)) if is_success(status) => {
                ctx.sse_state = SseState::WaitToolResp;
                replay_deferred(config, ctx, host);
            }
            Ok((status, _)) => fail(
                ctx,
                host,
                &ProxyError::backend_http("mcp-proxy:tools:backend_error", status),
            ),
            Err(e) => fail(ctx, host, &e),
        },
        other => {
            tracing::warn!(?other, "unexpected pending call on SSE path");
        }
    }
}

fn dispatch_event(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    event: &Event,
) {
    match ctx.sse_state {
        SseState::WaitEndpoint => {
            if event.name == ENDPOINT_EVENT {
                handle_endpoint(config, ctx, host, &event.data);
            }
        }
        SseState::SendingInit | SseState::WaitInitResp => {
            if let Some(frame) = correlated_message(event, jsonrpc::BACKEND_INIT_ID) {
                if ctx.sse_state == SseState::SendingInit {
                    // The POST has not acknowledged yet; replay once it does
                    // so outbound calls stay strictly serialized.
                    ctx.deferred_message = Some(frame);
                } else {
                    handle_init_frame(config, ctx, host, &frame);
                }
            }
        }
        SseState::SendingTool | SseState::WaitToolResp => {
            if let Some(frame) = correlated_message(event, jsonrpc::BACKEND_TOOL_ID) {
                if ctx.sse_state == SseState::SendingTool {
                    ctx.deferred_message = Some(frame);
                } else {
                    handle_tool_frame(config, ctx, host, &frame);
                }
            }
        }
        // No stream event is expected while the notify is in flight; anything
        // that arrives here is interleaved backend traffic.
        SseState::SendingNotify | SseState::WaitNotifyResp => {}
        SseState::None | SseState::Done | SseState::Failed => {}
    }
}

/// A `message` event whose inner JSON-RPC id matches the awaited value.
/// Mismatches are interleaved traffic and are silently discarded.
fn correlated_message(event: &Event, awaited_id: i64) -> Option<Value> {
    if !event.is_message() {
        return None;
    }
    let frame: Value = serde_json::from_str(&event.data).ok()?;
    if frame.get("jsonrpc").and_then(Value::as_str) != Some(jsonrpc::VERSION) {
        return None;
    }
    (frame.get("id").and_then(Value::as_i64) == Some(awaited_id)).then_some(frame)
}

fn replay_deferred(config: &ProxyConfig, ctx: &mut RequestContext, host: &mut dyn Host) {
    if let Some(frame) = ctx.deferred_message.take() {
        match ctx.sse_state {
            SseState::WaitInitResp => handle_init_frame(config, ctx, host, &frame),
            SseState::WaitToolResp => handle_tool_frame(config, ctx, host, &frame),
            _ => {}
        }
    }
}

fn handle_endpoint(config: &ProxyConfig, ctx: &mut RequestContext, host: &mut dyn Host, data: &str) {
    let Ok(base) = backend_url(config) else {
        fail(
            ctx,
            host,
            &ProxyError::new(
                ErrorKind::Internal,
                "mcp-proxy:config:invalid_url",
                "backend URL is not parseable",
            ),
        );
        return;
    };

    let endpoint = match base.join(data.trim()) {
        Ok(url) => url,
        Err(e) => {
            fail(
                ctx,
                host,
                &ProxyError::new(
                    ErrorKind::BackendParse,
                    "mcp-proxy:sse:endpoint_invalid",
                    format!("endpoint event carried an unusable URL '{data}': {e}"),
                ),
            );
            return;
        }
    };
    tracing::debug!(endpoint = %endpoint, "resolved SSE endpoint");
    ctx.sse_endpoint_url = Some(endpoint);

    send_sidecall(
        config,
        ctx,
        host,
        jsonrpc::initialize_request(),
        PendingCall::SseInitialize,
        SseState::SendingInit,
    );
}

fn handle_init_frame(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    frame: &Value,
) {
    if let Some(error_code) = crate::response::frame_error_code(frame) {
        let err = if error_code == i64::from(code::INVALID_PARAMS) {
            ProxyError::new(
                ErrorKind::InvalidParams,
                "mcp-proxy:initialize:version_incompatible",
                "protocol version not supported by backend",
            )
        } else {
            ProxyError::new(
                ErrorKind::BackendHttp,
                "mcp-proxy:initialize:backend_error",
                "backend initialization failed",
            )
        };
        fail(ctx, host, &err);
        return;
    }
    if frame.get("result").is_none() {
        fail(
            ctx,
            host,
            &ProxyError::new(
                ErrorKind::BackendParse,
                "mcp-proxy:initialize:parse_error",
                "initialize response carried no result",
            ),
        );
        return;
    }

    send_sidecall(
        config,
        ctx,
        host,
        jsonrpc::initialized_notification(),
        PendingCall::SseNotify,
        SseState::SendingNotify,
    );
}

fn send_tool_request(config: &ProxyConfig, ctx: &mut RequestContext, host: &mut dyn Host) {
    let method = ctx.method.clone().unwrap_or_default();
    let params = ctx.params.clone().unwrap_or_else(|| json!({}));
    let body = jsonrpc::backend_tool_request(&method, &params);
    send_sidecall(
        config,
        ctx,
        host,
        body,
        PendingCall::SseTool,
        SseState::SendingTool,
    );
}

fn handle_tool_frame(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    frame: &Value,
) {
    match crate::streamable_http::build_client_reply(config, ctx, frame) {
        Ok(reply) => {
            inject(ctx, host, &reply.body, success_tag(ctx));
            ctx.sse_state = SseState::Done;
            // Drop whatever the stream still holds; nothing further is read.
            ctx.sse_decoder = edgeline_sse_codec::EventDecoder::new();
        }
        Err(e) => fail(ctx, host, &e),
    }
}

/// POST one protocol step to the announced endpoint.
fn send_sidecall(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    body: Vec<u8>,
    purpose: PendingCall,
    next: SseState,
) {
    let Some(endpoint) = ctx.sse_endpoint_url.clone() else {
        fail(
            ctx,
            host,
            &ProxyError::new(
                ErrorKind::Internal,
                "mcp-proxy:sse:no_endpoint",
                "sidecall attempted before the endpoint event",
            ),
        );
        return;
    };

    let mut url = endpoint;
    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    // Session propagation: only when the endpoint URL itself carries no
    // session-bearing query string.
    if url.query().is_none_or(str::is_empty)
        && let Some(session) = &ctx.session_id
    {
        headers.push((MCP_SESSION_HEADER.to_string(), session.clone()));
    }
    if let Err(e) = auth::apply_resolved(config, &ctx.auth, &mut headers, &mut url) {
        fail(ctx, host, &e);
        return;
    }

    let call = OutboundCall {
        method: "POST",
        url: url.to_string(),
        headers,
        body,
        timeout_ms: config.server.timeout,
    };
    if let Err(e) = host.side_call(call) {
        fail(
            ctx,
            host,
            &ProxyError::new(
                ErrorKind::BackendHttp,
                "mcp-proxy:sse:sidecall_rejected",
                e.to_string(),
            ),
        );
        return;
    }
    ctx.pending = Some(purpose);
    ctx.sse_state = next;
}

fn ack_status(outcome: BackendOutcome) -> Result<(u16, Vec<(String, String)>), ProxyError> {
    crate::streamable_http::expect_response(outcome, "mcp-proxy:sse:sidecall")
        .map(|(status, headers, _)| (status, headers))
}

fn success_tag(ctx: &RequestContext) -> &'static str {
    if ctx.method.as_deref() == Some(jsonrpc::METHOD_TOOLS_LIST) {
        "mcp-proxy:tools/list:success"
    } else {
        "mcp-proxy:tools/call:success"
    }
}

/// Inject the terminal error frame and make the machine terminal. After a
/// failure frame nothing further may be injected.
pub(crate) fn fail(ctx: &mut RequestContext, host: &mut dyn Host, err: &ProxyError) {
    if ctx.sse_state.is_terminal() && ctx.replied {
        tracing::debug!(error = %err, "suppressing error after terminal state");
        return;
    }
    tracing::warn!(error = %err, tag = err.tag, "SSE exchange failed");
    ctx.sse_state = SseState::Failed;
    let bytes = jsonrpc::error_frame_for(ctx.id.as_ref(), err);
    inject(ctx, host, &bytes, err.tag);
}

fn inject(ctx: &mut RequestContext, host: &mut dyn Host, bytes: &[u8], tag: &'static str) {
    debug_assert!(!ctx.replied, "double injection of the final frame");
    if ctx.replied {
        return;
    }
    host.set_property("mcp_proxy_debug", tag);
    if let Err(e) = host.inject_encoded_response_body(bytes, true) {
        tracing::error!(error = %e, "response body injection failed");
        return;
    }
    ctx.replied = true;
}

fn backend_url(config: &ProxyConfig) -> Result<Url, ProxyError> {
    config.backend_url().map_err(|e| {
        ProxyError::new(
            ErrorKind::Internal,
            "mcp-proxy:config:invalid_url",
            e.to_string(),
        )
    })
}

fn authority_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(url.port().map_or_else(
        || host.to_string(),
        |port| format!("{host}:{port}"),
    ))
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) if !q.is_empty() => format!("{}?{q}", url.path()),
        _ => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_includes_non_default_port() {
        let url = Url::parse("http://backend.internal:8081/sse?x=1").unwrap();
        assert_eq!(authority_of(&url).as_deref(), Some("backend.internal:8081"));
        let url = Url::parse("http://backend.internal/sse").unwrap();
        assert_eq!(authority_of(&url).as_deref(), Some("backend.internal"));
    }

    #[test]
    fn path_and_query_round_trip() {
        let url = Url::parse("http://b/sse?session=1").unwrap();
        assert_eq!(path_and_query(&url), "/sse?session=1");
        let url = Url::parse("http://b/sse").unwrap();
        assert_eq!(path_and_query(&url), "/sse");
    }

    #[test]
    fn correlated_message_filters_name_id_and_version() {
        let make = |name: &str, data: &str| Event {
            name: name.to_string(),
            data: data.to_string(),
            id: None,
            retry: None,
        };

        let hit = make("message", r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert!(correlated_message(&hit, 1).is_some());

        let wrong_id = make("message", r#"{"jsonrpc":"2.0","id":9,"result":{}}"#);
        assert!(correlated_message(&wrong_id, 1).is_none());

        let wrong_name = make("endpoint", r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert!(correlated_message(&wrong_name, 1).is_none());

        let not_json = make("message", "plain text");
        assert!(correlated_message(&not_json, 1).is_none());

        let wrong_version = make("message", r#"{"jsonrpc":"1.0","id":1,"result":{}}"#);
        assert!(correlated_message(&wrong_version, 1).is_none());
    }
}
