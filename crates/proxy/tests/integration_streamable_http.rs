mod common;

use common::{MockHost, drive_http_exchange, http_config, json_body, proxy_for};
use edgeline_mcp_proxy::{BodyVerdict, Host};
use edgeline_mcp_proxy::host::BackendOutcome;
use serde_json::{Value, json};

fn initialize_ok() -> BackendOutcome {
    BackendOutcome::response(
        200,
        &[
            ("content-type", "application/json"),
            ("Mcp-Session-Id", "s1"),
        ],
        br#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}},"serverInfo":{"name":"B","version":"1"}}}"#,
    )
}

fn notify_ok() -> BackendOutcome {
    BackendOutcome::response(202, &[], b"")
}

fn tools_result(body: &str) -> BackendOutcome {
    BackendOutcome::response(200, &[("content-type", "application/json")], body.as_bytes())
}

#[test]
fn tools_list_is_forwarded_filtered_and_echoes_the_string_id() {
    let mut proxy = proxy_for(&http_config("allowTools: [A]\n"));
    let mut host = MockHost::new();

    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":"c1","method":"tools/list"}"#,
        vec![
            initialize_ok(),
            notify_ok(),
            tools_result(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"A"},{"name":"B"}]}}"#),
        ],
    )
    .expect("final reply");

    assert_eq!(
        json_body(&reply),
        json!({"jsonrpc":"2.0","id":"c1","result":{"tools":[{"name":"A"}]}})
    );
}

#[test]
fn three_backend_steps_run_in_order_with_fixed_inner_ids() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    proxy.on_request_headers(&mut host);
    let verdict = proxy.on_request_body(
        &mut host,
        br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#,
    );
    assert_eq!(verdict, BodyVerdict::Pause);

    // Step 1: initialize as a sidecall, id 1, advertised protocol version.
    let captured = host.take_call();
    assert!(!captured.routed);
    assert_eq!(captured.call.method, "POST");
    assert_eq!(captured.call.url, "http://backend.internal/mcp");
    let body: Value = serde_json::from_slice(&captured.call.body).unwrap();
    assert_eq!(body["method"], json!("initialize"));
    assert_eq!(body["id"], json!(1));
    assert_eq!(body["params"]["protocolVersion"], json!("2025-03-26"));
    assert!(proxy.on_backend_response(&mut host, initialize_ok()).is_none());

    // Step 2: notifications/initialized, no id, session header attached.
    let captured = host.take_call();
    assert!(!captured.routed);
    let body: Value = serde_json::from_slice(&captured.call.body).unwrap();
    assert_eq!(body["method"], json!("notifications/initialized"));
    assert!(body.get("id").is_none());
    assert!(
        captured
            .call
            .headers
            .iter()
            .any(|(k, v)| k == "Mcp-Session-Id" && v == "s1")
    );
    assert!(proxy.on_backend_response(&mut host, notify_ok()).is_none());

    // Step 3: the tool request goes through the route with id 2.
    let captured = host.take_call();
    assert!(captured.routed);
    let body: Value = serde_json::from_slice(&captured.call.body).unwrap();
    assert_eq!(body["method"], json!("tools/list"));
    assert_eq!(body["id"], json!(2));

    let reply = proxy
        .on_backend_response(
            &mut host,
            tools_result(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#),
        )
        .expect("final reply");
    let frame = json_body(&reply);
    // The client's numeric id comes back as a number, never a string.
    assert_eq!(frame["id"], json!(7));
}

#[test]
fn header_allow_list_intersects_with_empty_config() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::with_request_headers(&[("x-envoy-allow-mcp-tools", "B,C")]);

    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":"c1","method":"tools/list"}"#,
        vec![
            initialize_ok(),
            notify_ok(),
            tools_result(
                r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"A"},{"name":"B"},{"name":"C"}]}}"#,
            ),
        ],
    )
    .expect("final reply");

    let frame = json_body(&reply);
    let names: Vec<&str> = frame["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    // Empty config set means no static restriction; header order preserved.
    assert_eq!(names, vec!["B", "C"]);
    // The override header must not leak to the backend.
    assert!(host.get_request_header("x-envoy-allow-mcp-tools").is_none());
}

#[test]
fn notification_gets_a_202_ack_without_backend_interaction() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    proxy.on_request_headers(&mut host);
    let verdict = proxy.on_request_body(
        &mut host,
        br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
    );

    let BodyVerdict::Reply(reply) = verdict else {
        panic!("notification must be answered locally");
    };
    assert_eq!(reply.status, 202);
    assert!(reply.body.is_empty());
    assert!(host.calls.is_empty());
}

#[test]
fn unknown_method_is_method_not_found_echoing_the_id() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    proxy.on_request_headers(&mut host);
    let verdict = proxy.on_request_body(
        &mut host,
        br#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#,
    );

    let BodyVerdict::Reply(reply) = verdict else {
        panic!("unknown method must be answered locally");
    };
    let frame = json_body(&reply);
    assert_eq!(frame["id"], json!(5));
    assert_eq!(frame["error"]["code"], json!(-32601));
    assert!(host.calls.is_empty());
}

#[test]
fn invalid_json_is_parse_error_with_null_id() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    let verdict = proxy.on_request_body(&mut host, b"{nope");
    let BodyVerdict::Reply(reply) = verdict else {
        panic!("parse failure must be answered locally");
    };
    let frame = json_body(&reply);
    assert_eq!(frame["id"], Value::Null);
    assert_eq!(frame["error"]["code"], json!(-32700));
}

#[test]
fn failed_tool_call_is_wrapped_as_a_success_frame() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#,
        vec![
            initialize_ok(),
            notify_ok(),
            tools_result(
                r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"x"}],"isError":true}}"#,
            ),
        ],
    )
    .expect("final reply");

    let frame = json_body(&reply);
    assert!(frame.get("error").is_none(), "must stay a success frame");
    assert_eq!(
        frame["result"]["content"][0]["text"],
        json!("Backend error: x")
    );
    assert_eq!(frame["result"]["isError"], json!(true));
}

#[test]
fn backend_rejecting_protocol_version_maps_to_invalid_params() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
        vec![BackendOutcome::response(
            200,
            &[("content-type", "application/json")],
            br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"unsupported"}}"#,
        )],
    )
    .expect("error reply");

    let frame = json_body(&reply);
    assert_eq!(frame["error"]["code"], json!(-32602));
    assert!(
        frame["error"]["message"]
            .as_str()
            .unwrap()
            .contains("protocol version")
    );
}

#[test]
fn notify_failure_does_not_abort_the_exchange() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":0,"method":"tools/list"}"#,
        vec![
            initialize_ok(),
            BackendOutcome::response(500, &[], b"boom"),
            tools_result(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#),
        ],
    )
    .expect("final reply");

    let frame = json_body(&reply);
    assert_eq!(frame["id"], json!(0));
    assert_eq!(frame["result"]["tools"], json!([]));
}

#[test]
fn backend_5xx_and_timeouts_surface_as_internal_error() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();
    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":"x","method":"tools/list"}"#,
        vec![BackendOutcome::response(503, &[], b"unavailable")],
    )
    .expect("error reply");
    let frame = json_body(&reply);
    assert_eq!(frame["error"]["code"], json!(-32603));
    assert_eq!(frame["id"], json!("x"));

    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();
    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":"y","method":"tools/list"}"#,
        vec![BackendOutcome::TimedOut],
    )
    .expect("error reply");
    let frame = json_body(&reply);
    assert_eq!(frame["error"]["code"], json!(-32603));
    assert!(frame["error"]["message"].as_str().unwrap().contains("timed out"));
}

#[test]
fn tools_list_cursor_is_forwarded_to_the_backend() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    proxy.on_request_headers(&mut host);
    let verdict = proxy.on_request_body(
        &mut host,
        br#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{"cursor":"page-2"}}"#,
    );
    assert_eq!(verdict, BodyVerdict::Pause);

    host.take_call();
    assert!(proxy.on_backend_response(&mut host, initialize_ok()).is_none());
    host.take_call();
    assert!(proxy.on_backend_response(&mut host, notify_ok()).is_none());

    let tool_post = host.take_call();
    let body: Value = serde_json::from_slice(&tool_post.call.body).unwrap();
    assert_eq!(body["params"]["cursor"], json!("page-2"));
}

#[test]
fn large_integer_ids_survive_without_float_coercion() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":9007199254740993,"method":"tools/list"}"#,
        vec![
            initialize_ok(),
            notify_ok(),
            tools_result(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#),
        ],
    )
    .expect("final reply");

    let frame = json_body(&reply);
    assert_eq!(frame["id"].as_i64(), Some(9_007_199_254_740_993));
}

#[test]
fn backend_event_stream_post_response_is_decoded() {
    let mut proxy = proxy_for(&http_config(""));
    let mut host = MockHost::new();

    let sse_body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[{\"name\":\"A\"}]}}\n\n";
    let reply = drive_http_exchange(
        &mut proxy,
        &mut host,
        br#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
        vec![
            initialize_ok(),
            notify_ok(),
            BackendOutcome::response(
                200,
                &[("content-type", "text/event-stream")],
                sse_body.as_bytes(),
            ),
        ],
    )
    .expect("final reply");

    let frame = json_body(&reply);
    assert_eq!(frame["result"]["tools"], json!([{"name": "A"}]));
}

#[test]
fn declared_catalog_restricts_tool_names_and_applies_scheme_override() {
    let yaml = http_config(
        r#"  securitySchemes:
    - id: backendKey
      type: apiKey
      in: header
      name: X-Backend-Key
      defaultCredential: "bk-1"
tools:
  - name: echo
    description: Echo a message
    args:
      - name: message
        description: The message
        type: string
        required: true
    requestTemplate:
      security: { id: backendKey }
"#,
    );

    // Unknown tool is rejected locally.
    let mut proxy = proxy_for(&yaml);
    let mut host = MockHost::new();
    let verdict = proxy.on_request_body(
        &mut host,
        br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"ghost"}}"#,
    );
    let BodyVerdict::Reply(reply) = verdict else {
        panic!("unknown catalog tool must be rejected locally");
    };
    let frame = json_body(&reply);
    assert_eq!(frame["error"]["code"], json!(-32602));
    assert!(host.calls.is_empty());

    // Known tool: the override scheme's credential rides every backend call.
    let mut proxy = proxy_for(&yaml);
    let mut host = MockHost::new();
    proxy.on_request_headers(&mut host);
    let verdict = proxy.on_request_body(
        &mut host,
        br#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#,
    );
    assert_eq!(verdict, BodyVerdict::Pause);
    let captured = host.take_call();
    assert!(
        captured
            .call
            .headers
            .iter()
            .any(|(k, v)| k == "X-Backend-Key" && v == "bk-1")
    );
    assert_eq!(host.properties.get("mcp_tool_name").map(String::as_str), Some("echo"));
}
