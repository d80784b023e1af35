//! Unit tests for the JSON-RPC frame model and the NDJSON line codec.

use bytes::BytesMut;
use serde_json::{json, Value};
use tokio_util::codec::Decoder;

use agent_wire::rpc::codec::NdjsonCodec;
use agent_wire::rpc::frame::{id_key, Frame, RpcError, INTERNAL_ERROR, METHOD_NOT_FOUND};
use agent_wire::AppError;

// ── Frame ─────────────────────────────────────────────────────────────────────

#[test]
fn request_frame_serializes_without_reply_fields() {
    let frame = Frame::request(json!("1"), "prompt", json!({ "user_input": "hi" }));
    assert_eq!(
        serde_json::to_value(&frame).expect("encode"),
        json!({ "jsonrpc": "2.0", "id": "1", "method": "prompt", "params": { "user_input": "hi" } })
    );
    assert!(frame.is_call());
    assert!(!frame.is_reply());
}

#[test]
fn failure_without_id_uses_null() {
    let frame = Frame::failure(None, RpcError::method_not_found("nope"));
    let value = serde_json::to_value(&frame).expect("encode");
    assert_eq!(value["id"], Value::Null);
    assert_eq!(value["error"]["code"], METHOD_NOT_FOUND);
    assert_eq!(value["error"]["message"], "method not found: nope");
}

#[test]
fn reply_frame_is_classified_as_reply() {
    let frame: Frame =
        serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 3, "result": {} })).expect("decode");
    assert!(frame.is_reply());
    assert!(!frame.is_call());
}

#[test]
fn missing_jsonrpc_field_is_tolerated() {
    let frame: Frame = serde_json::from_value(json!({ "id": "x", "result": null })).expect("decode");
    assert_eq!(frame.jsonrpc, "2.0");
}

#[test]
fn bare_string_error_becomes_internal_error() {
    let frame: Frame = serde_json::from_value(json!({ "id": "x", "error": "kaboom" }))
        .expect("decode");
    assert_eq!(frame.error, Some(RpcError::new(INTERNAL_ERROR, "kaboom")));
}

#[test]
fn structured_error_keeps_data() {
    let frame: Frame = serde_json::from_value(json!({
        "id": "x",
        "error": { "code": -32000, "message": "busy", "data": { "retry": true } },
    }))
    .expect("decode");
    let err = frame.error.expect("error");
    assert_eq!(err.code, -32000);
    assert_eq!(err.data, Some(json!({ "retry": true })));
    assert_eq!(err.to_string(), "-32000 busy");
}

#[test]
fn numeric_and_string_ids_share_a_key() {
    assert_eq!(id_key(&json!(7)), id_key(&json!("7")));
    assert_eq!(id_key(&json!("abc")), "abc");
}

#[test]
fn rpc_error_converts_into_app_error() {
    let err: AppError = RpcError::internal("oops").into();
    assert_eq!(err.to_string(), "rpc: -32603 oops");
}

// ── Codec ─────────────────────────────────────────────────────────────────────

#[test]
fn decodes_lines_and_strips_crlf() {
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\r\n{\"b\":2}\n{\"c\"");
    assert_eq!(codec.decode(&mut buf).expect("ok").as_deref(), Some("{\"a\":1}"));
    assert_eq!(codec.decode(&mut buf).expect("ok").as_deref(), Some("{\"b\":2}"));
    assert_eq!(codec.decode(&mut buf).expect("ok"), None);
}

#[test]
fn oversized_line_is_transport_error_then_resyncs() {
    let mut codec = NdjsonCodec::with_max_length(8);
    let mut buf = BytesMut::from("0123456789abcdef\nok\n");
    let err = codec.decode(&mut buf).expect_err("too long");
    assert!(matches!(err, AppError::Transport(ref msg) if msg.starts_with("line too long")));

    // The rest of the offending line is discarded.
    let mut next = None;
    for _ in 0..4 {
        if let Ok(Some(line)) = codec.decode(&mut buf) {
            next = Some(line);
            break;
        }
    }
    assert_eq!(next.as_deref(), Some("ok"));
}

#[test]
fn encode_frame_appends_newline() {
    let mut codec = NdjsonCodec::new();
    let mut dst = BytesMut::new();
    codec
        .encode_frame(&Frame::success(json!(1), json!({})), &mut dst)
        .expect("encode");
    let text = std::str::from_utf8(&dst).expect("utf8");
    assert!(text.ends_with('\n'));
    assert_eq!(text.matches('\n').count(), 1);
}
