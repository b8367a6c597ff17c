//! Request driver: bridges the callback-style proxy core onto axum/reqwest.

use crate::host_impl::{QueuedCall, StandaloneHost};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use edgeline_mcp_proxy::host::{BackendOutcome, LocalReply};
use edgeline_mcp_proxy::{BodyVerdict, HeaderVerdict, Host, McpProxy, ProxyConfig, PseudoHeader};
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub http: reqwest::Client,
    pub version: &'static str,
    pub start_time: std::time::Instant,
}

/// POST /mcp: the single client-facing MCP endpoint.
pub async fn handle_mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut host = StandaloneHost::new(flatten_headers(&headers));
    let mut proxy = McpProxy::new(Arc::clone(&state.config));

    proxy.on_request_headers(&mut host);
    match proxy.on_request_body(&mut host, &body) {
        BodyVerdict::Reply(reply) => local_reply_response(reply),
        BodyVerdict::Pause => run_backend_exchange(&state, &mut proxy, &mut host).await,
        BodyVerdict::Continue => run_sse_channel(&state, &mut proxy, &mut host).await,
    }
}

/// StreamableHTTP path: perform queued backend calls until the core hands
/// back the final reply.
async fn run_backend_exchange(
    state: &AppState,
    proxy: &mut McpProxy,
    host: &mut StandaloneHost,
) -> Response {
    loop {
        let Some(queued) = host.queued.pop_front() else {
            tracing::error!("backend exchange stalled without a reply");
            return (StatusCode::BAD_GATEWAY, "backend exchange stalled").into_response();
        };
        let outcome = perform(&state.http, queued).await;
        if let Some(reply) = proxy.on_backend_response(host, outcome) {
            return local_reply_response(reply);
        }
    }
}

/// SSE path: issue the rewritten GET, stream chunks into the core, and
/// perform the sidecalls it queues along the way.
async fn run_sse_channel(
    state: &AppState,
    proxy: &mut McpProxy,
    host: &mut StandaloneHost,
) -> Response {
    let url = match rewritten_get_url(state, host) {
        Ok(url) => url,
        Err(resp) => return resp,
    };

    let mut request = state.http.get(&url);
    for (name, value) in host.all_request_headers() {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        request = request.header(name, value);
    }

    let mut upstream = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(error = %e, "SSE GET to backend failed");
            return (StatusCode::BAD_GATEWAY, "backend unreachable").into_response();
        }
    };

    host.set_response_headers(
        upstream
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect(),
    );

    if proxy.on_response_headers(host) == HeaderVerdict::StopIteration {
        return injected_response(host);
    }

    loop {
        // Deliver completions for calls the last chunk queued before reading
        // further stream bytes; per-request ordering matches the gateway's.
        while let Some(queued) = host.queued.pop_front() {
            let outcome = perform(&state.http, queued).await;
            let _ = proxy.on_backend_response(host, outcome);
            if host.response_ended() {
                return injected_response(host);
            }
        }

        match upstream.chunk().await {
            Ok(Some(chunk)) => {
                let _ = proxy.on_response_body_chunk(host, &chunk, false);
                if host.response_ended() {
                    return injected_response(host);
                }
            }
            Ok(None) => {
                let _ = proxy.on_response_body_chunk(host, b"", true);
                return injected_response(host);
            }
            Err(e) => {
                tracing::warn!(error = %e, "backend stream failed");
                let _ = proxy.on_response_body_chunk(host, b"", true);
                return injected_response(host);
            }
        }
    }
}

/// Perform one outbound call. The standalone host has no separate route, so
/// routed calls use the same client as sidecalls.
async fn perform(client: &reqwest::Client, queued: QueuedCall) -> BackendOutcome {
    let call = queued.call;
    let method = match reqwest::Method::from_bytes(call.method.as_bytes()) {
        Ok(m) => m,
        Err(_) => return BackendOutcome::TransportFailed("bad method".to_string()),
    };

    let mut request = client
        .request(method, &call.url)
        .timeout(Duration::from_millis(call.timeout_ms))
        .body(call.body);
    for (name, value) in call.headers {
        request = request.header(name, value);
    }

    match request.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            match resp.bytes().await {
                Ok(body) => BackendOutcome::Response {
                    status,
                    headers,
                    body: body.to_vec(),
                },
                Err(e) => BackendOutcome::TransportFailed(e.to_string()),
            }
        }
        Err(e) if e.is_timeout() => BackendOutcome::TimedOut,
        Err(e) => BackendOutcome::TransportFailed(e.to_string()),
    }
}

/// Reassemble the backend GET URL from the pseudo headers the core rewrote.
/// `:scheme` stays host-managed: it is taken from the configured backend URL.
fn rewritten_get_url(state: &AppState, host: &StandaloneHost) -> Result<String, Response> {
    let scheme = state
        .config
        .backend_url()
        .map(|u| u.scheme().to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "configured backend URL unusable");
            (StatusCode::INTERNAL_SERVER_ERROR, "bad backend URL").into_response()
        })?;
    let authority = host.pseudo(PseudoHeader::Authority).ok_or_else(|| {
        (StatusCode::INTERNAL_SERVER_ERROR, "missing :authority").into_response()
    })?;
    let path = host.pseudo(PseudoHeader::Path).unwrap_or("/");
    Ok(format!("{scheme}://{authority}{path}"))
}

fn local_reply_response(reply: LocalReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
    let mut response = (status, reply.body).into_response();
    if let Some(content_type) = reply.content_type
        && let Ok(value) = HeaderValue::from_str(content_type)
    {
        response
            .headers_mut()
            .insert(axum::http::header::CONTENT_TYPE, value);
    }
    response
}

/// Materialize the injected body plus the response headers the core set.
fn injected_response(host: &mut StandaloneHost) -> Response {
    let (body, headers) = host.take_injected();
    if body.is_empty() {
        return (StatusCode::BAD_GATEWAY, "backend produced no reply").into_response();
    }

    let mut status = StatusCode::OK;
    let mut response_headers = Vec::new();
    for (name, value) in headers {
        if name == ":status" {
            if let Ok(code) = value.parse::<u16>() {
                status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
            }
            continue;
        }
        if name.starts_with(':') {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response_headers.push((name, value));
        }
    }

    let mut response = (status, body).into_response();
    for (name, value) in response_headers {
        response.headers_mut().insert(name, value);
    }
    response
}

fn flatten_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect()
}
