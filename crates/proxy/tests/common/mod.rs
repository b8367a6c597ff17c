//! A scripted in-memory host for exercising the proxy hooks end to end.

use edgeline_mcp_proxy::host::{
    BackendOutcome, Host, HostError, LocalReply, OutboundCall, PseudoHeader,
};
use edgeline_mcp_proxy::{BodyVerdict, McpProxy, ProxyConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// An outbound call captured from the proxy, with its dispatch mode.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub call: OutboundCall,
    pub routed: bool,
}

#[derive(Default)]
pub struct MockHost {
    pub request_headers: Vec<(String, String)>,
    pub pseudo_headers: HashMap<&'static str, String>,
    pub response_headers: Vec<(String, String)>,
    pub calls: VecDeque<CapturedCall>,
    pub injections: Vec<(Vec<u8>, bool)>,
    pub response_ended: bool,
    pub streaming_paused: bool,
    pub properties: HashMap<String, String>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_headers(headers: &[(&str, &str)]) -> Self {
        Self {
            request_headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn set_response_headers(&mut self, headers: &[(&str, &str)]) {
        self.response_headers = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
    }

    /// Pop the single outstanding captured call.
    pub fn take_call(&mut self) -> CapturedCall {
        assert_eq!(self.calls.len(), 1, "expected exactly one outstanding call");
        self.calls.pop_front().expect("outstanding call")
    }

    /// The injected terminal frame, parsed as JSON.
    pub fn injected_frame(&self) -> serde_json::Value {
        assert_eq!(self.injections.len(), 1, "expected exactly one injection");
        let (bytes, end) = &self.injections[0];
        assert!(*end, "final injection must end the stream");
        serde_json::from_slice(bytes).expect("injected frame is json")
    }
}

impl Host for MockHost {
    fn get_request_header(&self, name: &str) -> Option<String> {
        self.request_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn set_request_header(&mut self, name: &str, value: &str) {
        for (k, v) in &mut self.request_headers {
            if k.eq_ignore_ascii_case(name) {
                *v = value.to_string();
                return;
            }
        }
        self.request_headers
            .push((name.to_string(), value.to_string()));
    }

    fn remove_request_header(&mut self, name: &str) {
        self.request_headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    fn all_request_headers(&self) -> Vec<(String, String)> {
        self.request_headers.clone()
    }

    fn replace_request_pseudo_header(&mut self, pseudo: PseudoHeader, value: &str) {
        self.pseudo_headers.insert(pseudo.as_str(), value.to_string());
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        self.response_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn replace_response_header(&mut self, name: &str, value: &str) {
        for (k, v) in &mut self.response_headers {
            if k.eq_ignore_ascii_case(name) {
                *v = value.to_string();
                return;
            }
        }
        self.response_headers
            .push((name.to_string(), value.to_string()));
    }

    fn remove_response_header(&mut self, name: &str) {
        self.response_headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    fn pause_streaming_response(&mut self) {
        self.streaming_paused = true;
    }

    fn inject_encoded_response_body(
        &mut self,
        body: &[u8],
        end_stream: bool,
    ) -> Result<(), HostError> {
        if self.response_ended {
            return Err(HostError::ResponseEnded);
        }
        self.injections.push((body.to_vec(), end_stream));
        self.response_ended = end_stream;
        Ok(())
    }

    fn side_call(&mut self, call: OutboundCall) -> Result<(), HostError> {
        self.calls.push_back(CapturedCall {
            call,
            routed: false,
        });
        Ok(())
    }

    fn route_call(&mut self, call: OutboundCall) -> Result<(), HostError> {
        self.calls.push_back(CapturedCall { call, routed: true });
        Ok(())
    }

    fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }

    fn get_property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }
}

pub fn proxy_for(yaml: &str) -> McpProxy {
    let config = ProxyConfig::from_yaml(yaml).expect("valid test config");
    McpProxy::new(Arc::new(config))
}

pub fn http_config(extra: &str) -> String {
    format!(
        r"
server:
  name: test-backend
  type: mcp-proxy
  transport: http
  mcpServerURL: http://backend.internal/mcp
{extra}"
    )
}

pub fn sse_config(extra: &str) -> String {
    format!(
        r"
server:
  name: test-backend
  type: mcp-proxy
  transport: sse
  mcpServerURL: http://backend.internal/sse
{extra}"
    )
}

/// Drive a StreamableHTTP exchange: feed the body, then answer the three
/// backend calls in order with the provided outcomes.
pub fn drive_http_exchange(
    proxy: &mut McpProxy,
    host: &mut MockHost,
    body: &[u8],
    outcomes: Vec<BackendOutcome>,
) -> Option<LocalReply> {
    proxy.on_request_headers(host);
    let verdict = proxy.on_request_body(host, body);
    match verdict {
        BodyVerdict::Pause => {}
        BodyVerdict::Reply(reply) => return Some(reply),
        BodyVerdict::Continue => panic!("StreamableHTTP path must pause or reply"),
    }

    for outcome in outcomes {
        let _ = host.take_call();
        if let Some(reply) = proxy.on_backend_response(host, outcome) {
            return Some(reply);
        }
    }
    None
}

pub fn json_body(reply: &LocalReply) -> serde_json::Value {
    serde_json::from_slice(&reply.body).expect("reply body is json")
}
