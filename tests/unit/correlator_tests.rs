use serde_json::{json, Value};

use mcp_harness::protocol::{Inbound, RequestCorrelator, ResponseBody};
use mcp_harness::AppError;

#[test]
fn request_line_is_single_line_json_rpc() {
    let mut correlator = RequestCorrelator::new();
    let request = correlator.build("tools/call", Some(json!({"name": "echo"})));
    let line = request.to_line().unwrap();

    assert!(!line.contains('\n'));
    let value: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["id"], 1);
    assert_eq!(value["method"], "tools/call");
    assert_eq!(value["params"]["name"], "echo");
}

#[test]
fn request_without_params_omits_field() {
    let mut correlator = RequestCorrelator::new();
    let line = correlator.build("tools/list", None).to_line().unwrap();
    let value: Value = serde_json::from_str(&line).unwrap();
    assert!(value.get("params").is_none());
}

#[test]
fn ids_are_unique_per_correlator() {
    let mut first = RequestCorrelator::new();
    let mut second = RequestCorrelator::new();
    first.build("a", None);
    first.build("b", None);
    assert_eq!(first.build("c", None).id(), 3);
    assert_eq!(second.build("a", None).id(), 1);
}

#[test]
fn parse_accepts_result_response() {
    let response = RequestCorrelator::parse(r#"{"jsonrpc":"2.0","id":4,"result":{"ok":true}}"#).unwrap();
    assert_eq!(response.id, 4);
    assert_eq!(response.result(), Some(&json!({"ok": true})));
    assert!(response.error().is_none());
}

#[test]
fn parse_accepts_error_response() {
    let response = RequestCorrelator::parse(
        r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"method not found"}}"#,
    )
    .unwrap();
    match response.body {
        ResponseBody::Error(err) => {
            assert_eq!(err.code, -32601);
            assert_eq!(err.message, "method not found");
        }
        ResponseBody::Result(_) => panic!("expected error body"),
    }
}

#[test]
fn parse_rejects_malformed_envelopes() {
    let cases = [
        "not json at all",
        "[1,2,3]",
        r#"{"id":1,"result":{}}"#,
        r#"{"jsonrpc":"1.0","id":1,"result":{}}"#,
        r#"{"jsonrpc":"2.0","result":{}}"#,
        r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#,
        r#"{"jsonrpc":"2.0","id":1}"#,
        r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#,
        r#"{"jsonrpc":"2.0","id":1,"error":"flat string"}"#,
    ];
    for raw in cases {
        let err = RequestCorrelator::parse(raw).unwrap_err();
        assert!(
            matches!(err, AppError::Protocol(_)),
            "expected protocol error for {raw}, got {err:?}"
        );
    }
}

#[test]
fn correlate_passes_matching_id() {
    let mut correlator = RequestCorrelator::new();
    let request = correlator.build("tools/list", None);
    let response = RequestCorrelator::parse(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
    assert!(RequestCorrelator::correlate(&request, response).is_ok());
}

#[test]
fn correlate_rejects_mismatched_id() {
    let mut correlator = RequestCorrelator::new();
    let request = correlator.build("tools/list", None);
    let response = RequestCorrelator::parse(r#"{"jsonrpc":"2.0","id":9,"result":{}}"#).unwrap();
    let err = RequestCorrelator::correlate(&request, response).unwrap_err();
    assert_eq!(
        err,
        AppError::Correlation {
            expected: 1,
            received: 9
        }
    );
}

#[test]
fn classify_returns_responses_unchanged() {
    let inbound = RequestCorrelator::classify(r#"{"jsonrpc":"2.0","id":3,"result":[]}"#).unwrap();
    match inbound {
        Inbound::Response(response) => assert_eq!(response.id, 3),
        Inbound::ServerMessage { .. } => panic!("expected a response"),
    }
}
