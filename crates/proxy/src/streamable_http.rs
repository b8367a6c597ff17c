//! StreamableHTTP backend exchange.
//!
//! Three POSTs against `mcpServerURL`, strictly serialized on the request
//! task: `initialize` (id 1), `notifications/initialized`, then the
//! forwarded tool request (id 2). The first two travel as sidecalls; the
//! final one goes through the host's route so it traverses the same path as
//! the inbound request. The client stays paused until the tool response is
//! turned into a local reply.

use crate::auth;
use crate::config::ProxyConfig;
use crate::context::{HttpState, PendingCall, RequestContext};
use crate::error::{ErrorKind, ProxyError};
use crate::filter;
use crate::host::{BackendOutcome, Host, LocalReply, OutboundCall};
use crate::jsonrpc::{self, METHOD_TOOLS_LIST, code};
use crate::response;
use serde_json::{Value, json};

pub(crate) const MCP_SESSION_HEADER: &str = "Mcp-Session-Id";

/// Kick off the exchange: apply auth and POST `initialize`.
pub(crate) fn start(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
) -> Result<(), ProxyError> {
    send_step(
        config,
        ctx,
        host,
        jsonrpc::initialize_request(),
        PendingCall::HttpInitialize,
    )?;
    ctx.http_state = HttpState::Initialize;
    Ok(())
}

pub(crate) fn on_backend_response(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    pending: PendingCall,
    outcome: BackendOutcome,
) -> Result<Option<LocalReply>, ProxyError> {
    match pending {
        PendingCall::HttpInitialize => on_initialize_response(config, ctx, host, outcome),
        PendingCall::HttpNotify => on_notify_response(config, ctx, host, outcome),
        PendingCall::HttpTool => on_tool_response(config, ctx, outcome),
        other => Err(ProxyError::new(
            ErrorKind::Internal,
            "mcp-proxy:http:unexpected_pending",
            format!("unexpected pending call {other:?} on StreamableHTTP path"),
        )),
    }
}

fn on_initialize_response(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    outcome: BackendOutcome,
) -> Result<Option<LocalReply>, ProxyError> {
    let (status, headers, body) = expect_response(outcome, "mcp-proxy:initialize")?;
    if !is_success(status) {
        return Err(ProxyError::backend_http(
            "mcp-proxy:initialize:backend_error",
            status,
        ));
    }

    let frame = response::decode_backend_frame(
        header_value(&headers, "content-type").as_deref(),
        &body,
        "mcp-proxy:initialize:parse_error",
    )?;

    if let Some(error_code) = response::frame_error_code(&frame) {
        if error_code == i64::from(code::INVALID_PARAMS) {
            return Err(ProxyError::new(
                ErrorKind::InvalidParams,
                "mcp-proxy:initialize:version_incompatible",
                "protocol version not supported by backend",
            ));
        }
        return Err(ProxyError::new(
            ErrorKind::BackendHttp,
            "mcp-proxy:initialize:backend_error",
            "backend initialization failed",
        ));
    }
    if frame.get("result").is_none() {
        return Err(ProxyError::new(
            ErrorKind::BackendParse,
            "mcp-proxy:initialize:parse_error",
            "initialize response carried no result",
        ));
    }

    if let Some(session) = header_value(&headers, MCP_SESSION_HEADER) {
        tracing::debug!(session_id = %session, "captured backend session id");
        ctx.session_id = Some(session);
    }

    send_step(
        config,
        ctx,
        host,
        jsonrpc::initialized_notification(),
        PendingCall::HttpNotify,
    )?;
    ctx.http_state = HttpState::Notify;
    Ok(None)
}

fn on_notify_response(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    outcome: BackendOutcome,
) -> Result<Option<LocalReply>, ProxyError> {
    // Notify failures are logged but never abort the exchange; the backend
    // may still serve tool calls.
    match &outcome {
        BackendOutcome::Response { status, .. } if is_success(*status) => {}
        BackendOutcome::Response { status, .. } => {
            tracing::warn!(status, "initialized notification rejected by backend");
        }
        BackendOutcome::TimedOut => {
            tracing::warn!("initialized notification timed out");
        }
        BackendOutcome::TransportFailed(e) => {
            tracing::warn!(error = %e, "initialized notification transport failure");
        }
    }

    let method = ctx.method.clone().unwrap_or_default();
    let params = ctx.params.clone().unwrap_or_else(|| json!({}));
    let body = jsonrpc::backend_tool_request(&method, &params);
    send_tool_step(config, ctx, host, body)?;
    ctx.http_state = HttpState::Tool;
    Ok(None)
}

fn on_tool_response(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    outcome: BackendOutcome,
) -> Result<Option<LocalReply>, ProxyError> {
    let method = ctx.method.clone().unwrap_or_default();
    let tag_error: &'static str = if method == METHOD_TOOLS_LIST {
        "mcp-proxy:tools/list:backend_error"
    } else {
        "mcp-proxy:tools/call:backend_error"
    };
    let tag_parse: &'static str = if method == METHOD_TOOLS_LIST {
        "mcp-proxy:tools/list:parse_error"
    } else {
        "mcp-proxy:tools/call:parse_error"
    };

    let (status, headers, body) = expect_response(outcome, "mcp-proxy:tools")?;
    if !is_success(status) {
        return Err(ProxyError::backend_http(tag_error, status));
    }

    let frame = response::decode_backend_frame(
        header_value(&headers, "content-type").as_deref(),
        &body,
        tag_parse,
    )?;

    let reply = build_client_reply(config, ctx, &frame)?;
    ctx.http_state = HttpState::Done;
    Ok(Some(reply))
}

/// Turn the backend's authoritative frame into the client-facing reply,
/// echoing the client's opaque id.
pub(crate) fn build_client_reply(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    frame: &Value,
) -> Result<LocalReply, ProxyError> {
    if let Some(error_code) = response::frame_error_code(frame) {
        let message = response::frame_error_message(frame).unwrap_or("backend error");
        let bytes = jsonrpc::error_frame(
            ctx.id.as_ref(),
            i32::try_from(error_code).unwrap_or(code::INTERNAL_ERROR),
            message,
        );
        return Ok(LocalReply::json(bytes));
    }

    let Some(result) = frame.get("result") else {
        return Err(ProxyError::new(
            ErrorKind::BackendParse,
            "mcp-proxy:tools:invalid_response",
            "backend frame carried neither result nor error",
        ));
    };
    let mut result = result.clone();

    if ctx.method.as_deref() == Some(METHOD_TOOLS_LIST) {
        filter::filter_tools_result(
            &mut result,
            &config.allow_tools,
            ctx.allow_tools_header.as_ref(),
        );
    } else if response::wrap_tool_error(&mut result) {
        tracing::warn!(
            tool = ctx
                .store
                .get::<String>(crate::context::keys::TOOL_NAME)
                .map(String::as_str),
            "backend reported tool call error"
        );
    }

    let Some(id) = ctx.id.as_ref() else {
        return Err(ProxyError::new(
            ErrorKind::Internal,
            "mcp-proxy:tools:missing_client_id",
            "tool request without a client id reached response assembly",
        ));
    };
    Ok(LocalReply::json(jsonrpc::success_frame(id, &result)))
}

/// POST one handshake step as a sidecall.
fn send_step(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    body: Vec<u8>,
    purpose: PendingCall,
) -> Result<(), ProxyError> {
    let call = build_call(config, ctx, body)?;
    host.side_call(call).map_err(|e| {
        ProxyError::new(
            ErrorKind::BackendHttp,
            "mcp-proxy:http:sidecall_rejected",
            e.to_string(),
        )
    })?;
    ctx.pending = Some(purpose);
    Ok(())
}

/// POST the final tool request through the host's route.
fn send_tool_step(
    config: &ProxyConfig,
    ctx: &mut RequestContext,
    host: &mut dyn Host,
    body: Vec<u8>,
) -> Result<(), ProxyError> {
    let call = build_call(config, ctx, body)?;
    host.route_call(call).map_err(|e| {
        ProxyError::new(
            ErrorKind::BackendHttp,
            "mcp-proxy:http:routecall_rejected",
            e.to_string(),
        )
    })?;
    ctx.pending = Some(PendingCall::HttpTool);
    Ok(())
}

fn build_call(
    config: &ProxyConfig,
    ctx: &RequestContext,
    body: Vec<u8>,
) -> Result<OutboundCall, ProxyError> {
    let mut url = config.backend_url().map_err(|e| {
        ProxyError::new(
            ErrorKind::Internal,
            "mcp-proxy:config:invalid_url",
            e.to_string(),
        )
    })?;

    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        (
            "Accept".to_string(),
            "application/json, text/event-stream".to_string(),
        ),
    ];
    if let Some(session) = &ctx.session_id {
        headers.push((MCP_SESSION_HEADER.to_string(), session.clone()));
    }
    auth::apply_resolved(config, &ctx.auth, &mut headers, &mut url)?;

    Ok(OutboundCall {
        method: "POST",
        url: url.to_string(),
        headers,
        body,
        timeout_ms: config.server.timeout,
    })
}

pub(crate) fn expect_response(
    outcome: BackendOutcome,
    step: &'static str,
) -> Result<(u16, Vec<(String, String)>, Vec<u8>), ProxyError> {
    match outcome {
        BackendOutcome::Response {
            status,
            headers,
            body,
        } => Ok((status, headers, body)),
        BackendOutcome::TimedOut => Err(ProxyError::new(
            ErrorKind::Timeout,
            step,
            "backend call timed out",
        )),
        BackendOutcome::TransportFailed(detail) => Err(ProxyError::new(
            ErrorKind::BackendHttp,
            step,
            format!("backend call failed: {detail}"),
        )),
    }
}

pub(crate) fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

pub(crate) const fn is_success(status: u16) -> bool {
    status >= 200 && status < 300
}
