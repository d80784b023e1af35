//! Unit tests for external tool definitions, invocation, and the registry.

use serde::Deserialize;
use serde_json::{json, Value};

use agent_wire::session::tools::{ToolFuture, ToolHandler, ToolRegistry};
use agent_wire::{AppError, Content, Tool};

#[derive(Deserialize)]
struct AddArgs {
    a: i64,
    b: i64,
}

fn add_tool() -> Tool {
    Tool::from_fn(
        "add",
        "Add two integers",
        json!({
            "type": "object",
            "properties": { "a": { "type": "integer" }, "b": { "type": "integer" } },
            "required": ["a", "b"],
        }),
        |args: AddArgs| async move { Ok(args.a + args.b) },
    )
    .expect("tool")
}

struct Shout;

impl ToolHandler for Shout {
    fn call(&self, arguments: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| AppError::Protocol("missing text".into()))?;
            Ok::<_, AppError>(text.to_uppercase())
        })
    }
}

#[tokio::test]
async fn typed_closure_receives_decoded_arguments() {
    let value = add_tool().invoke(Some(r#"{"a": 2, "b": 40}"#)).await;
    assert!(!value.is_error);
    // Non-string outputs are JSON-encoded.
    assert_eq!(value.output, Content::text("42"));
}

#[tokio::test]
async fn handler_trait_implementation_runs() {
    let tool = Tool::new("shout", "Uppercase", json!({ "type": "object" }), Shout).expect("tool");
    let value = tool.invoke(Some(r#"{"text":"hey"}"#)).await;
    assert_eq!(value.output, Content::text("HEY"));
}

#[tokio::test]
async fn bad_arguments_become_error_result() {
    let value = add_tool().invoke(Some(r#"{"a": "two"}"#)).await;
    assert!(value.is_error);
    let Content::Text(text) = &value.output else {
        panic!("expected text output");
    };
    assert!(text.contains("invalid tool arguments"), "{text}");
}

#[tokio::test]
async fn non_json_arguments_become_error_result() {
    let value = add_tool().invoke(Some("not json")).await;
    assert!(value.is_error);
}

#[tokio::test]
async fn missing_arguments_default_to_empty_object() {
    let tool = Tool::from_fn(
        "noop",
        "Takes nothing",
        json!({ "type": "object" }),
        |args: Value| async move { Ok(args.as_object().map_or(usize::MAX, serde_json::Map::len)) },
    )
    .expect("tool");
    assert_eq!(tool.invoke(None).await.output, Content::text("0"));
    assert_eq!(tool.invoke(Some("  ")).await.output, Content::text("0"));
}

#[test]
fn definition_matches_wire_shape() {
    let tool = add_tool();
    assert_eq!(tool.name(), "add");
    let def = serde_json::to_value(tool.definition()).expect("encode");
    assert_eq!(def["type"], "function");
    assert_eq!(def["function"]["name"], "add");
    assert_eq!(def["function"]["description"], "Add two integers");
    assert_eq!(def["function"]["parameters"]["required"], json!(["a", "b"]));
}

#[test]
fn invalid_definitions_are_rejected() {
    let empty = Tool::new("", "x", json!({ "type": "object" }), Shout);
    assert!(matches!(empty, Err(AppError::Config(_))));

    let not_object = Tool::new("t", "x", json!({ "type": "string" }), Shout);
    assert!(matches!(not_object, Err(AppError::Config(_))));
}

#[test]
fn registry_keeps_order_and_rejects_duplicates() {
    let shout = Tool::new("shout", "Uppercase", json!({ "type": "object" }), Shout).expect("tool");
    let registry = ToolRegistry::new(vec![shout, add_tool()]).expect("registry");
    let names: Vec<String> = registry
        .definitions()
        .into_iter()
        .map(|d| d.function.name)
        .collect();
    assert_eq!(names, vec!["shout".to_owned(), "add".to_owned()]);
    assert!(registry.get("add").is_some());
    assert!(registry.get("subtract").is_none());

    let err = ToolRegistry::new(vec![add_tool(), add_tool()]).expect_err("duplicate");
    assert_eq!(err, AppError::Config("duplicate tool name: add".into()));
}
