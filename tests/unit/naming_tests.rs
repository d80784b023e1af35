//! Unit tests for the method-name table.

use agent_wire::rpc::naming::{InboundMethod, MethodTable, OutboundMethod};

#[test]
fn defaults_use_plain_names() {
    let table = MethodTable::default();
    assert_eq!(table.outbound(OutboundMethod::Initialize), "initialize");
    assert_eq!(table.outbound(OutboundMethod::Prompt), "prompt");
    assert_eq!(table.outbound(OutboundMethod::Cancel), "cancel");
    assert_eq!(table.inbound("event"), Some(InboundMethod::Event));
    assert_eq!(table.inbound("request"), Some(InboundMethod::Request));
    assert!(table.conflicts().is_empty());
}

#[test]
fn inbound_matching_ignores_case() {
    let table = MethodTable::default();
    assert_eq!(table.inbound("Event"), Some(InboundMethod::Event));
    assert_eq!(table.inbound("REQUEST"), Some(InboundMethod::Request));
    assert_eq!(table.inbound("events"), None);
}

#[test]
fn renamed_table_routes_new_names_only() {
    let table = MethodTable {
        event: "session/update".into(),
        ..MethodTable::default()
    };
    assert_eq!(table.inbound("session/update"), Some(InboundMethod::Event));
    assert_eq!(table.inbound("event"), None);
}

#[test]
fn conflicts_report_empty_and_duplicate_names() {
    let table = MethodTable {
        prompt: String::new(),
        cancel: "Event".into(),
        ..MethodTable::default()
    };
    let problems = table.conflicts();
    assert_eq!(problems.len(), 2, "{problems:?}");
    assert!(problems[0].contains("methods.prompt must not be empty"));
    assert!(problems[1].contains("methods.cancel and methods.event"));
}

#[test]
fn table_deserializes_partially() {
    let table: MethodTable = toml::from_str("prompt = \"session/prompt\"").expect("parse");
    assert_eq!(table.outbound(OutboundMethod::Prompt), "session/prompt");
    assert_eq!(table.outbound(OutboundMethod::Cancel), "cancel");
}
