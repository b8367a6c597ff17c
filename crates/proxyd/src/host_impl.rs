//! In-memory [`Host`] implementation backing one HTTP request.
//!
//! Mutations requested by the proxy core (header rewrites, pseudo headers,
//! queued outbound calls, body injection) are recorded here; the driver in
//! `server.rs` turns them into actual reqwest traffic and the final axum
//! response.

use edgeline_mcp_proxy::host::{Host, HostError, OutboundCall, PseudoHeader};
use std::collections::{HashMap, VecDeque};

/// An outbound call queued by the core, with its dispatch mode. The
/// standalone host has no Envoy-style route, so routed calls are performed
/// exactly like sidecalls.
#[derive(Debug)]
pub struct QueuedCall {
    pub call: OutboundCall,
    pub routed: bool,
}

#[derive(Default)]
pub struct StandaloneHost {
    pub request_headers: Vec<(String, String)>,
    pub pseudo_headers: HashMap<&'static str, String>,
    pub response_headers: Vec<(String, String)>,
    pub queued: VecDeque<QueuedCall>,
    injected: Vec<u8>,
    ended: bool,
    pub streaming_paused: bool,
    pub properties: HashMap<String, String>,
}

impl StandaloneHost {
    pub fn new(request_headers: Vec<(String, String)>) -> Self {
        Self {
            request_headers,
            ..Self::default()
        }
    }

    /// Whether the core already produced the terminal injected body.
    pub fn response_ended(&self) -> bool {
        self.ended
    }

    /// The injected body plus the response headers the core arranged.
    pub fn take_injected(&mut self) -> (Vec<u8>, Vec<(String, String)>) {
        (
            std::mem::take(&mut self.injected),
            std::mem::take(&mut self.response_headers),
        )
    }

    pub fn set_response_headers(&mut self, headers: Vec<(String, String)>) {
        self.response_headers = headers;
    }

    pub fn pseudo(&self, pseudo: PseudoHeader) -> Option<&str> {
        self.pseudo_headers
            .get(pseudo.as_str())
            .map(String::as_str)
    }
}

impl Host for StandaloneHost {
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
        if self.ended {
            return Err(HostError::ResponseEnded);
        }
        self.injected.extend_from_slice(body);
        self.ended = end_stream;
        Ok(())
    }

    fn side_call(&mut self, call: OutboundCall) -> Result<(), HostError> {
        self.queued.push_back(QueuedCall {
            call,
            routed: false,
        });
        Ok(())
    }

    fn route_call(&mut self, call: OutboundCall) -> Result<(), HostError> {
        self.queued.push_back(QueuedCall { call, routed: true });
        Ok(())
    }

    fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }

    fn get_property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }
}
