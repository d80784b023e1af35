//! Encode/decode round trips for every event kind, both request kinds, and
//! both content shapes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use agent_wire::wire::EventKind;
use agent_wire::{Content, ContentPart, Event, Request};

/// Decode `sample`, then check `decode(encode(v)) == v` and that a second
/// encoding is byte-identical to the first.
fn assert_round_trip<T>(sample: &Value) -> T
where
    T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let value: T = serde_json::from_str(&sample.to_string())
        .unwrap_or_else(|err| panic!("decode {sample}: {err}"));
    let encoded = serde_json::to_string(&value).expect("encode");
    let decoded: T = serde_json::from_str(&encoded).expect("decode encoded");
    assert_eq!(decoded, value, "round trip of {sample}");
    assert_eq!(
        serde_json::to_string(&decoded).expect("re-encode"),
        encoded,
        "stable encoding of {sample}"
    );
    value
}

fn event_samples() -> Vec<Value> {
    vec![
        json!({ "type": "TurnBegin", "payload": { "user_input": "hello" } }),
        json!({ "type": "TurnBegin", "payload": { "user_input": [{ "type": "text", "text": "hi" }] } }),
        json!({ "type": "StepBegin", "payload": { "n": 3 } }),
        json!({ "type": "StepInterrupted", "payload": {} }),
        json!({ "type": "CompactionBegin" }),
        json!({ "type": "CompactionEnd", "payload": {} }),
        json!({
            "type": "StatusUpdate",
            "payload": {
                "context_usage": 0.25,
                "token_usage": {
                    "input_other": 100,
                    "output": 50,
                    "input_cache_read": 7,
                    "input_cache_creation": 3,
                },
                "message_id": "msg-1",
            },
        }),
        json!({ "type": "StatusUpdate", "payload": {} }),
        json!({ "type": "ContentPart", "payload": { "type": "text", "text": "out" } }),
        json!({
            "type": "ContentPart",
            "payload": { "type": "think", "think": "hmm", "encrypted": "c2VjcmV0" },
        }),
        json!({
            "type": "ToolCall",
            "payload": {
                "type": "function",
                "id": "call-1",
                "function": { "name": "ls", "arguments": "{\"path\":\".\"}" },
                "extras": { "provider": "x" },
            },
        }),
        json!({ "type": "ToolCallPart", "payload": { "arguments_part": "\"rust\"}" } }),
        json!({
            "type": "ToolResult",
            "payload": {
                "tool_call_id": "call-1",
                "return_value": {
                    "is_error": true,
                    "output": [{ "type": "text", "text": "boom" }],
                    "message": "exit 1",
                    "display": [{ "type": "brief", "text": "failed" }],
                },
            },
        }),
        json!({
            "type": "SubagentEvent",
            "payload": {
                "task_tool_call_id": "task-1",
                "event": { "type": "StepBegin", "payload": { "n": 1 } },
            },
        }),
        json!({
            "type": "ApprovalRequestResolved",
            "payload": { "request_id": "r1", "response": "reject" },
        }),
    ]
}

/// All twelve event kinds survive encode then decode unchanged.
#[test]
fn every_event_kind_round_trips() {
    let mut covered = Vec::new();
    for sample in event_samples() {
        let event: Event = assert_round_trip(&sample);
        assert_eq!(event.kind().as_str(), sample["type"], "discriminator kept");
        covered.push(event.kind());
    }
    for kind in EventKind::ALL {
        assert!(covered.contains(&kind), "no sample for {}", kind.as_str());
    }
}

/// Approval and external tool-call requests round-trip.
#[test]
fn both_request_kinds_round_trip() {
    let approval: Request = assert_round_trip(&json!({
        "type": "ApprovalRequest",
        "payload": {
            "id": "approval-1",
            "tool_call_id": "call-1",
            "sender": "Shell",
            "action": "run command",
            "description": "run `ls`",
            "display": [{ "type": "diff", "path": "a.rs", "old_text": "x", "new_text": "y" }],
        },
    }));
    assert!(matches!(approval, Request::Approval(_)));

    let tool: Request = assert_round_trip(&json!({
        "type": "ExternalToolCallRequest",
        "payload": {
            "id": "tool-req-1",
            "tool_call_id": "call-7",
            "type": "function",
            "function": { "name": "echo", "arguments": "{}" },
        },
    }));
    assert!(matches!(tool, Request::ToolCall(_)));
}

/// Bare strings, empty part lists, and think parts with `encrypted` round-trip.
#[test]
fn content_round_trips_in_both_shapes() {
    let text: Content = assert_round_trip(&json!("plain"));
    assert_eq!(text, Content::text("plain"));

    let empty: Content = assert_round_trip(&json!([]));
    assert_eq!(empty, Content::Parts(Vec::new()));

    let parts: Content = assert_round_trip(&json!([
        { "type": "text", "text": "a" },
        { "type": "think", "think": "b", "encrypted": "opaque" },
        { "type": "image_url", "image_url": { "url": "https://example.com/cat.png" } },
        { "type": "audio_url", "audio_url": { "id": "a1", "url": "data:audio/wav;base64,AA==" } },
    ]));
    let Content::Parts(parts) = parts else {
        panic!("expected parts");
    };
    assert_eq!(parts.len(), 4);
    assert!(matches!(
        &parts[1],
        ContentPart::Think { encrypted: Some(blob), .. } if blob == "opaque"
    ));
}
