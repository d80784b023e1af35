//! Turn cancellation: explicit, through tokens, and by closing the session.
//!
//! Every test uses one-second cancel grace and shutdown timeouts, so waits
//! for an agent that never answers stay short.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use agent_wire::config::TimeoutConfig;
use agent_wire::{AppError, ConnectOptions, PromptStatus, SessionState};

use super::test_helpers::{collect_steps, connect, connect_with, texts, STEP_TIMEOUT};

// ── Explicit cancel ──────────────────────────────────────────────────────────

/// `Turn::cancel` sends the `cancel` call and finalizes with `cancelled`.
/// A second cancel is a no-op.
#[tokio::test]
async fn cancel_sends_cancel_call_and_finalizes() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        agent.event("StepBegin", json!({ "n": 1 })).await;
        agent.text("working...").await;
        let cancel = agent.expect_call("cancel").await;
        agent.reply(&cancel["id"], json!({})).await;
        agent
            .reply(&prompt["id"], json!({ "status": "cancelled" }))
            .await;
        agent
    });

    let mut turn = session.prompt("long task").await.expect("prompt");
    turn.cancel().await.expect("cancel");
    assert!(turn.is_finished());
    assert_eq!(turn.result().status, PromptStatus::Cancelled);
    assert!(turn.err().is_none());
    assert!(turn.next_step().await.is_none());

    turn.cancel().await.expect("second cancel is a no-op");
    assert_eq!(turn.result().status, PromptStatus::Cancelled);

    let _agent = script.await.expect("script");
    session.close().await.expect("close");
}

/// An agent that acknowledges `cancel` but never answers the prompt only
/// holds the turn for the cancel grace period.
#[tokio::test]
async fn cancel_without_prompt_reply_waits_for_grace_only() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let _prompt = agent.expect_call("prompt").await;
        agent.text("working...").await;
        let cancel = agent.expect_call("cancel").await;
        agent.reply(&cancel["id"], json!({})).await;
        agent
    });

    let mut turn = session.prompt("stuck").await.expect("prompt");
    tokio::time::timeout(Duration::from_secs(5), turn.cancel())
        .await
        .expect("cancel bounded by grace")
        .expect("cancel");
    assert_eq!(turn.result().status, PromptStatus::Cancelled);

    let _agent = script.await.expect("script");
    session.close().await.expect("close");
}

/// A turn the agent already finished keeps its status when cancelled late.
#[tokio::test]
async fn late_cancel_keeps_finished_status() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        agent.text("all done").await;
        agent.finish(&prompt["id"], 1).await;
        agent
    });

    let mut turn = session.prompt("quick").await.expect("prompt");
    let _agent = script.await.expect("script");
    // Give the reply time to land before cancelling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    turn.cancel().await.expect("cancel");
    assert_eq!(turn.result().status, PromptStatus::Finished);

    session.close().await.expect("close");
}

// ── Tokens ───────────────────────────────────────────────────────────────────

/// Cancelling the turn's token from the consumer stops the stream.
#[tokio::test]
async fn cancel_token_stops_iteration() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        agent.event("StepBegin", json!({ "n": 1 })).await;
        agent.text("first").await;
        let cancel = agent.expect_call("cancel").await;
        agent.reply(&cancel["id"], json!({})).await;
        agent
            .reply(&prompt["id"], json!({ "status": "cancelled" }))
            .await;
        agent
    });

    let mut turn = session.prompt("stream").await.expect("prompt");
    let token = turn.cancel_token();
    let mut seen = 0;
    while let Some(message) = tokio::time::timeout(STEP_TIMEOUT, turn.next_message())
        .await
        .expect("stream ends in time")
    {
        drop(message);
        seen += 1;
        token.cancel();
    }
    assert!(seen <= 1);
    assert_eq!(turn.result().status, PromptStatus::Cancelled);

    let _agent = script.await.expect("script");
    session.close().await.expect("close");
}

/// A token cancelled before `prompt_with` fails fast and sends nothing.
#[tokio::test]
async fn precancelled_token_fails_without_sending() {
    let (session, mut agent) = connect().await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = session
        .prompt_with("never sent", cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, AppError::Cancelled(_)), "{err:?}");

    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        assert_eq!(prompt["params"]["user_input"], "sent");
        agent.finish(&prompt["id"], 0).await;
        agent
    });
    let mut turn = session.prompt("sent").await.expect("prompt");
    collect_steps(&mut turn).await;

    let _agent = script.await.expect("script");
    session.close().await.expect("close");
}

/// An external token fired before the first message aborts the prompt and
/// frees the session for the next one.
#[tokio::test]
async fn external_cancel_before_first_message() {
    let (session, mut agent) = connect().await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let script = tokio::spawn(async move {
        let prompt = agent.expect_call("prompt").await;
        trigger.cancel();
        let call = agent.expect_call("cancel").await;
        agent.reply(&call["id"], json!({})).await;
        agent
            .reply(&prompt["id"], json!({ "status": "cancelled" }))
            .await;

        let next = agent.expect_call("prompt").await;
        agent.text("fresh").await;
        agent.finish(&next["id"], 1).await;
        agent
    });

    let err = session
        .prompt_with("abort", cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, AppError::Cancelled(_)), "{err:?}");

    let mut turn = session.prompt("again").await.expect("slot is free");
    let steps = collect_steps(&mut turn).await;
    assert_eq!(texts(&steps[0].1), vec!["fresh".to_owned()]);

    let _agent = script.await.expect("script");
    session.close().await.expect("close");
}

/// Tokens passed to `prompt_with` stop being tracked once their turn is
/// over, so repeated prompts do not pile up background tasks.
#[tokio::test]
async fn prompt_with_link_ends_with_turn() {
    let (session, mut agent) = connect().await;
    let baseline = session.background_tasks();

    let script = tokio::spawn(async move {
        for i in 0..5 {
            let prompt = agent.expect_call("prompt").await;
            agent.text(&format!("reply {i}")).await;
            agent.finish(&prompt["id"], 1).await;
        }
        agent
    });

    let caller = CancellationToken::new();
    for i in 0..5 {
        let mut turn = session
            .prompt_with(format!("turn {i}"), caller.clone())
            .await
            .expect("prompt");
        let steps = collect_steps(&mut turn).await;
        assert_eq!(texts(&steps[0].1), vec![format!("reply {i}")]);
        drop(turn);
        assert_eq!(session.background_tasks(), baseline, "after turn {i}");
    }

    // Cancelling the caller's token after the fact touches nothing.
    caller.cancel();
    assert_eq!(session.background_tasks(), baseline);

    let _agent = script.await.expect("script");
    session.close().await.expect("close");
}

// ── Close ────────────────────────────────────────────────────────────────────

/// Closing the session with a turn still open cancels the turn without
/// deadlocking; the turn then reports `cancelled`.
#[tokio::test]
async fn close_with_live_turn_cancels_it() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let _prompt = agent.expect_call("prompt").await;
        agent.text("working...").await;
        agent
    });

    let mut turn = session.prompt("forever").await.expect("prompt");
    let _agent = script.await.expect("script");

    let closed = tokio::time::timeout(Duration::from_secs(8), session.close())
        .await
        .expect("close finished in time");
    // The unanswered prompt may outlive the one-second shutdown timeout.
    assert!(
        matches!(closed, Ok(()) | Err(AppError::Transport(_))),
        "{closed:?}"
    );
    assert_eq!(session.state(), SessionState::Closed);

    tokio::time::timeout(STEP_TIMEOUT, async {
        while turn.next_message().await.is_some() {}
    })
    .await
    .expect("turn drained after close");
    assert_eq!(turn.result().status, PromptStatus::Cancelled);
    assert!(turn.is_finished());
}

/// A turn still waiting out its cancel grace when the shutdown timeout
/// expires makes `close` report the timeout.
#[tokio::test]
async fn close_reports_shutdown_timeout() {
    let (session, mut agent) = connect_with(ConnectOptions {
        timeouts: TimeoutConfig {
            cancel_grace_seconds: 3,
            shutdown_seconds: 1,
            ..TimeoutConfig::default()
        },
        ..ConnectOptions::default()
    })
    .await;

    let script = tokio::spawn(async move {
        let _prompt = agent.expect_call("prompt").await;
        agent.text("busy").await;
        // The cancel call is read but never answered.
        let _cancel = agent.expect_call("cancel").await;
        agent
    });

    let _turn = session.prompt("stubborn").await.expect("prompt");
    let err = tokio::time::timeout(STEP_TIMEOUT, session.close())
        .await
        .expect("close finished in time")
        .expect_err("shutdown timeout");
    assert!(matches!(err, AppError::Transport(_)), "{err:?}");
    assert!(err.to_string().contains("shutdown timeout"), "{err}");
    assert_eq!(session.state(), SessionState::Closed);

    session.close().await.expect("second close is a no-op");
    let _agent = script.await.expect("script");
}

/// Close is idempotent, releases the pipe, and rejects further prompts.
#[tokio::test]
async fn close_is_idempotent() {
    let (session, mut agent) = connect().await;
    assert_eq!(session.state(), SessionState::Serving);

    session.close().await.expect("close");
    session.close().await.expect("close");
    assert_eq!(session.state(), SessionState::Closed);
    assert!(agent.closed().await, "client end of the pipe is closed");

    let err = session.prompt("late").await.expect_err("closed");
    assert!(matches!(err, AppError::Closed(_)), "{err:?}");
}

/// Dropping an unfinished turn releases the session for the next prompt.
#[tokio::test]
async fn dropped_turn_frees_the_session() {
    let (session, mut agent) = connect().await;

    let script = tokio::spawn(async move {
        let first = agent.expect_call("prompt").await;
        agent.text("abandoned").await;
        let cancel = agent.expect_call("cancel").await;
        agent.reply(&cancel["id"], json!({})).await;
        agent
            .reply(&first["id"], json!({ "status": "cancelled" }))
            .await;

        let second = agent.expect_call("prompt").await;
        agent.finish(&second["id"], 0).await;
        agent
    });

    let turn = session.prompt("first").await.expect("prompt");
    drop(turn);

    let mut second = tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            match session.prompt("second").await {
                Err(AppError::Busy(_)) => tokio::time::sleep(Duration::from_millis(20)).await,
                other => break other,
            }
        }
    })
    .await
    .expect("slot released in time")
    .expect("second prompt");
    collect_steps(&mut second).await;
    assert_eq!(second.result().status, PromptStatus::Finished);

    let _agent = script.await.expect("script");
    session.close().await.expect("close");
}
