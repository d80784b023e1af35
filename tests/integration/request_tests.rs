//! Agent-initiated requests: approvals, external tool calls, and the replies
//! the session sends back for them.

use serde_json::{json, Value};

use agent_wire::{AppError, ApprovalResponse, Message, PromptStatus, Request, Tool, ToolReturnValue};

use super::test_helpers::{collect_steps, connect, connect_with_tools, texts};

fn tool_call(name: &str, arguments: &str) -> Value {
    json!({
        "id": "tool-req-1",
        "tool_call_id": "call-1",
        "type": "function",
        "function": { "name": name, "arguments": arguments },
    })
}

// ── Approvals ────────────────────────────────────────────────────────────────

/// An approval answered by the consumer reaches the agent as
/// `{request_id, response}`.
#[tokio::test]
async fn approval_response_is_sent_to_agent() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        agent.event("StepBegin", json!({ "n": 1 })).await;
        let req = agent.approval("approval-1").await;
        let reply = agent.expect_reply(&req).await;
        agent.finish(&prompt["id"], 1).await;
        reply
    });

    let mut turn = session.prompt("approve me").await.expect("prompt");
    while let Some(message) = turn.next_message().await {
        if let Message::Request(pending) = message {
            let Request::Approval(request) = pending.request() else {
                panic!("expected approval, got {:?}", pending.request());
            };
            assert_eq!(request.sender, "Shell");
            pending
                .respond(ApprovalResponse::ApproveForSession)
                .expect("respond");
            assert!(pending.is_answered());
        }
    }
    assert_eq!(turn.result().status, PromptStatus::Finished);

    let reply = script.await.expect("script");
    assert_eq!(
        reply["result"],
        json!({ "request_id": "approval-1", "response": "approve_for_session" })
    );
    session.close().await.expect("close");
}

/// A request pushed right before the prompt reply is still delivered and
/// answered; the turn does not deadlock waiting for it.
#[tokio::test]
async fn request_racing_the_reply_is_delivered() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        agent.event("StepBegin", json!({ "n": 1 })).await;
        let req = agent.approval("approval-1").await;
        // Reply without waiting for the approval answer.
        agent.finish(&prompt["id"], 1).await;
        agent.expect_reply(&req).await
    });

    let mut turn = session.prompt("race").await.expect("prompt");
    let mut answered = 0;
    while let Some(message) = turn.next_message().await {
        if let Some(pending) = message.as_request() {
            pending.reject().expect("reject");
            answered += 1;
        }
    }
    assert_eq!(answered, 1);
    assert_eq!(turn.result().status, PromptStatus::Finished);

    let reply = script.await.expect("script");
    assert_eq!(reply["result"]["response"], "reject");
    session.close().await.expect("close");
}

/// Dropping a request without answering rejects it with an internal error.
#[tokio::test]
async fn dropped_request_is_rejected() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        let req = agent.approval("approval-1").await;
        let reply = agent.expect_reply(&req).await;
        agent.finish(&prompt["id"], 1).await;
        reply
    });

    let mut turn = session.prompt("ignore").await.expect("prompt");
    while let Some(message) = turn.next_message().await {
        drop(message);
    }

    let reply = script.await.expect("script");
    assert_eq!(reply["error"]["code"], -32603);
    assert_eq!(reply["error"]["message"], "request dropped without a response");
    session.close().await.expect("close");
}

/// A request outside any turn is refused.
#[tokio::test]
async fn request_without_turn_is_refused() {
    let (session, mut agent) = connect().await;

    let req = agent.approval("approval-1").await;
    let reply = agent.expect_reply(&req).await;
    assert_eq!(reply["error"]["code"], -32603);
    assert_eq!(reply["error"]["message"], "no roundtrip in progress");

    session.close().await.expect("close");
}

/// A response of the wrong kind is refused locally and does not consume
/// the request; answering twice fails.
#[tokio::test]
async fn respond_checks_kind_and_single_use() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        let req = agent.approval("approval-1").await;
        let reply = agent.expect_reply(&req).await;
        agent.finish(&prompt["id"], 1).await;
        reply
    });

    let mut turn = session.prompt("kinds").await.expect("prompt");
    while let Some(message) = turn.next_message().await {
        let Some(pending) = message.as_request() else {
            continue;
        };
        let wrong = pending
            .respond(ToolReturnValue::ok("nope"))
            .expect_err("wrong kind");
        assert!(matches!(wrong, AppError::Protocol(_)), "{wrong:?}");
        assert!(!pending.is_answered());

        pending.approve().expect("first answer");
        let twice = pending.approve().expect_err("second answer");
        assert!(matches!(twice, AppError::AlreadyConsumed(_)), "{twice:?}");
    }

    let reply = script.await.expect("script");
    assert_eq!(reply["result"]["response"], "approve");
    session.close().await.expect("close");
}

// ── External tools ───────────────────────────────────────────────────────────

/// A call to a registered tool is answered by the session; the consumer
/// only sees the surrounding events.
#[tokio::test]
async fn registered_tool_is_answered_by_session() {
    let tool = Tool::from_fn(
        "test_tool",
        "Echo the input",
        json!({ "type": "object", "properties": { "input": { "type": "string" } } }),
        |args: Value| async move {
            let input = args["input"].as_str().unwrap_or_default().to_owned();
            Ok(format!("result: {input}"))
        },
    )
    .expect("tool");
    let (session, mut agent) = connect_with_tools(vec![tool]).await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        agent.event("StepBegin", json!({ "n": 1 })).await;
        let req = agent
            .request("ExternalToolCallRequest", tool_call("test_tool", r#"{"input":"hello"}"#))
            .await;
        let reply = agent.expect_reply(&req).await;
        agent.text("done").await;
        agent.finish(&prompt["id"], 1).await;
        reply
    });

    let mut turn = session.prompt("use the tool").await.expect("prompt");
    let steps = collect_steps(&mut turn).await;
    assert!(steps
        .iter()
        .flat_map(|(_, messages)| messages)
        .all(|m| m.as_request().is_none()));
    assert_eq!(texts(&steps[0].1), vec!["done".to_owned()]);

    let reply = script.await.expect("script");
    assert_eq!(reply["result"]["tool_call_id"], "call-1");
    assert_eq!(reply["result"]["return_value"]["is_error"], false);
    assert_eq!(reply["result"]["return_value"]["output"], "result: hello");
    session.close().await.expect("close");
}

/// A failing tool handler is reported to the agent as `is_error`.
#[tokio::test]
async fn failing_tool_reports_error_result() {
    let tool = Tool::from_fn(
        "broken",
        "Always fails",
        json!({ "type": "object" }),
        |_: Value| async move { Err::<String, _>(AppError::Io("disk on fire".into())) },
    )
    .expect("tool");
    let (session, mut agent) = connect_with_tools(vec![tool]).await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        let req = agent
            .request("ExternalToolCallRequest", tool_call("broken", ""))
            .await;
        let reply = agent.expect_reply(&req).await;
        agent.finish(&prompt["id"], 1).await;
        reply
    });

    let mut turn = session.prompt("break").await.expect("prompt");
    collect_steps(&mut turn).await;

    let reply = script.await.expect("script");
    let value = &reply["result"]["return_value"];
    assert_eq!(value["is_error"], true);
    assert_eq!(value["output"], "io: disk on fire");
    session.close().await.expect("close");
}

/// A call to a tool the session does not know is forwarded to the consumer.
#[tokio::test]
async fn unregistered_tool_is_forwarded() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        let req = agent
            .request("ExternalToolCallRequest", tool_call("mystery", r#"{"q":1}"#))
            .await;
        let reply = agent.expect_reply(&req).await;
        agent.finish(&prompt["id"], 1).await;
        reply
    });

    let mut turn = session.prompt("forward").await.expect("prompt");
    let mut forwarded = false;
    while let Some(message) = turn.next_message().await {
        if let Some(pending) = message.as_request() {
            let Request::ToolCall(call) = pending.request() else {
                panic!("expected tool call");
            };
            assert_eq!(call.function.name, "mystery");
            assert_eq!(call.function.arguments.as_deref(), Some(r#"{"q":1}"#));
            pending
                .respond(ToolReturnValue::ok("handled by consumer"))
                .expect("respond");
            forwarded = true;
        }
    }
    assert!(forwarded);

    let reply = script.await.expect("script");
    assert_eq!(reply["result"]["tool_call_id"], "call-1");
    assert_eq!(
        reply["result"]["return_value"]["output"],
        "handled by consumer"
    );
    session.close().await.expect("close");
}
