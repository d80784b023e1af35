//! Round-trip machinery behind [`Turn`].
//!
//! Three background tasks serve each turn:
//!
//! - **originator**: awaits the `prompt` reply, then waits until the
//!   dispatcher has handled every callback the agent sent before that reply,
//!   stores the outcome, and unbinds the sink. Unbinding drops the last relay
//!   sender, which is what closes the turn's stream.
//! - **cancel watcher**: sends the `cancel` RPC if the turn is cancelled
//!   before the reply arrives.
//! - **traverse**: splits the relayed messages into steps and folds usage
//!   reports into the turn's counters.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::rpc::connection::{PendingCall, Reply};
use crate::rpc::transport::{decode_result, Transport};
use crate::session::sink::{LiveTurn, SinkHandle, SinkSlot};
use crate::session::spawner::ExitInfo;
use crate::turn::{Step, Turn, TurnShared};
use crate::wire::content::Content;
use crate::wire::event::Event;
use crate::wire::params::{PromptParams, PromptResult, PromptStatus};
use crate::wire::request::Message;
use crate::{AppError, Result};

/// Capacity of the relay between the dispatcher and a turn.
pub const MESSAGE_BUFFER: usize = 64;
/// Capacity of the step queue.
pub const STEP_BUFFER: usize = 8;
/// Capacity of each step's message queue.
pub const STEP_MESSAGE_BUFFER: usize = 16;
/// How long a failed turn waits for the process exit status to settle.
pub const EXIT_SETTLE: Duration = Duration::from_millis(500);

/// Session state a turn needs.
#[derive(Debug, Clone)]
pub(crate) struct TurnContext {
    pub(crate) transport: Transport,
    pub(crate) slot: Arc<SinkSlot>,
    pub(crate) handled: watch::Receiver<u64>,
    pub(crate) exit: watch::Receiver<Option<ExitInfo>>,
    pub(crate) cancel_grace: Duration,
}

/// Start a turn and return it as soon as the first message arrives.
///
/// - The reply arrives first with an error and nothing was pushed: the error
///   is returned and no turn is created.
/// - The reply arrives first with a result and nothing was pushed: an empty
///   turn carrying that result is returned.
/// - `parent` or `external` fires first: the turn is cancelled, torn down,
///   and [`AppError::Cancelled`] is returned.
///
/// `external` stays linked to the turn only until the prompt concludes.
pub(crate) async fn roundtrip(
    ctx: &TurnContext,
    turn_id: u64,
    content: Content,
    parent: &CancellationToken,
    external: Option<CancellationToken>,
) -> Result<Turn> {
    if parent.is_cancelled() || external.as_ref().is_some_and(CancellationToken::is_cancelled) {
        return Err(AppError::Cancelled("prompt cancelled before start".into()));
    }

    let token = parent.child_token();
    let (msg_tx, mut msg_rx) = mpsc::channel(MESSAGE_BUFFER);
    let sink = ctx
        .slot
        .try_acquire(turn_id, msg_tx, token.clone())
        .ok_or_else(|| AppError::Busy("another turn is in progress".into()))?;

    // The sink handle is dropped on error here, which unbinds the slot.
    let pending = ctx.transport.start_prompt(&PromptParams {
        user_input: content,
    })?;
    info!(turn_id, call_id = pending.id(), "turn started");

    let shared = Arc::new(TurnShared::default());
    let tasks = TaskTracker::new();
    let concluded = CancellationToken::new();
    ctx.slot.insert_live(
        turn_id,
        LiveTurn {
            token: token.clone(),
            tasks: tasks.clone(),
        },
    );

    tasks.spawn(originate(Originator {
        turn_id,
        pending,
        token: token.clone(),
        concluded: concluded.clone(),
        handled: ctx.handled.clone(),
        sink,
        shared: Arc::clone(&shared),
        grace: ctx.cancel_grace,
    }));
    if let Some(external) = external {
        tasks.spawn(link_cancel(external, token.clone(), concluded.clone()));
    }
    tasks.spawn(watch_cancel(
        ctx.transport.clone(),
        token.clone(),
        concluded,
        ctx.cancel_grace,
    ));

    let first = tokio::select! {
        biased;

        first = msg_rx.recv() => first,
        () = token.cancelled() => {
            debug!(turn_id, "turn cancelled before first message");
            // Unanswered requests in the backlog are dropped here and rejected.
            while msg_rx.recv().await.is_some() {}
            tasks.close();
            tasks.wait().await;
            ctx.slot.remove_live(turn_id);
            return Err(AppError::Cancelled("prompt cancelled".into()));
        }
    };

    if first.is_none() {
        tasks.close();
        tasks.wait().await;
        if let Some(err) = shared.outcome_error() {
            ctx.slot.remove_live(turn_id);
            let mut exit = ctx.exit.clone();
            return Err(prefer_exit(&mut exit, err).await);
        }
    }

    let (steps_tx, steps_rx) = mpsc::channel(STEP_BUFFER);
    tasks.spawn(traverse(
        first,
        msg_rx,
        steps_tx,
        Arc::clone(&shared),
        token.clone(),
    ));
    tasks.close();

    Ok(Turn::new(
        turn_id,
        token,
        steps_rx,
        shared,
        tasks,
        Arc::clone(&ctx.slot),
        ctx.exit.clone(),
    ))
}

// ── Originator ───────────────────────────────────────────────────────────────

struct Originator {
    turn_id: u64,
    pending: PendingCall,
    token: CancellationToken,
    concluded: CancellationToken,
    handled: watch::Receiver<u64>,
    sink: SinkHandle,
    shared: Arc<TurnShared>,
    grace: Duration,
}

async fn originate(mut o: Originator) {
    let turn_id = o.turn_id;
    let reply = tokio::select! {
        biased;

        reply = o.pending.wait() => Some(reply),
        () = o.token.cancelled() => None,
    };
    let reply = match reply {
        Some(reply) => Some(reply),
        None => tokio::time::timeout(o.grace, o.pending.wait()).await.ok(),
    };
    o.concluded.cancel();

    let (outcome, barrier) = match reply {
        Some(Reply {
            outcome,
            after_inbound,
        }) => (outcome.and_then(decode_result::<PromptResult>), after_inbound),
        None => {
            debug!(turn_id, grace = ?o.grace, "turn: no prompt reply within cancel grace");
            (Ok(PromptResult::cancelled()), 0)
        }
    };
    let outcome = if o.token.is_cancelled() {
        settle_cancelled(outcome)
    } else {
        outcome
    };

    // Everything the agent pushed before the reply must reach the relay
    // before the stream may close. A closed watch means the dispatcher is
    // gone and nothing more can arrive.
    if barrier > 0 {
        let _ = o.handled.wait_for(|seen| *seen >= barrier).await;
    }

    match &outcome {
        Ok(result) => debug!(turn_id, status = %result.status, "turn: prompt concluded"),
        Err(err) => debug!(turn_id, error = %err, "turn: prompt failed"),
    }
    o.shared.store_outcome(outcome);
    o.sink.release();
}

/// A cancelled turn reports `cancelled` unless the agent already finished.
fn settle_cancelled(outcome: Result<PromptResult>) -> Result<PromptResult> {
    match outcome {
        Ok(result) if result.status != PromptStatus::Pending => Ok(result),
        Ok(_) | Err(_) => Ok(PromptResult::cancelled()),
    }
}

async fn watch_cancel(
    transport: Transport,
    token: CancellationToken,
    concluded: CancellationToken,
    timeout: Duration,
) {
    tokio::select! {
        biased;

        () = concluded.cancelled() => {}
        () = token.cancelled() => {
            // Best effort; the turn tears down regardless of the outcome.
            let _ = transport.cancel(timeout).await;
        }
    }
}

/// Forward a caller's token to the turn until the prompt concludes.
async fn link_cancel(
    external: CancellationToken,
    token: CancellationToken,
    concluded: CancellationToken,
) {
    tokio::select! {
        biased;

        () = concluded.cancelled() => {}
        () = token.cancelled() => {}
        () = external.cancelled() => token.cancel(),
    }
}

// ── Traverse ─────────────────────────────────────────────────────────────────

async fn traverse(
    first: Option<Message>,
    mut incoming: mpsc::Receiver<Message>,
    steps: mpsc::Sender<Step>,
    shared: Arc<TurnShared>,
    token: CancellationToken,
) {
    let mut outgoing: Option<mpsc::Sender<Message>> = None;
    let mut next = first;

    loop {
        let message = match next.take() {
            Some(message) => message,
            None => tokio::select! {
                biased;

                () = token.cancelled() => break,
                message = incoming.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            },
        };

        let message = match message {
            Message::Event(Event::TurnBegin(_)) => continue,
            Message::Event(Event::StepBegin(begin)) => {
                outgoing = open_step(begin.n, &steps, &token).await;
                if outgoing.is_none() {
                    break;
                }
                continue;
            }
            Message::Event(Event::StatusUpdate(update)) => {
                shared.apply_status(&update);
                continue;
            }
            other => other,
        };

        // Messages before the first StepBegin go to an implicit step 0.
        if outgoing.is_none() {
            outgoing = open_step(0, &steps, &token).await;
        }
        let Some(tx) = &outgoing else {
            break;
        };
        tokio::select! {
            biased;

            () = token.cancelled() => break,
            // A consumer that dropped the step discards the rest of it.
            _ = tx.send(message) => {}
        }
    }

    // Cancelled: discard the backlog so blocked pushes complete and
    // unanswered requests are rejected.
    drop(outgoing);
    drop(steps);
    while incoming.recv().await.is_some() {}
}

async fn open_step(
    n: u32,
    steps: &mpsc::Sender<Step>,
    token: &CancellationToken,
) -> Option<mpsc::Sender<Message>> {
    let (tx, rx) = mpsc::channel(STEP_MESSAGE_BUFFER);
    tokio::select! {
        biased;

        () = token.cancelled() => None,
        _ = steps.send(Step::new(n, rx)) => Some(tx),
    }
}

// ── Exit priority ────────────────────────────────────────────────────────────

/// Replace `err` with the subprocess exit error when the agent died with a
/// non-zero status. Transport failures wait briefly for the status to settle.
pub(crate) async fn prefer_exit(
    exit: &mut watch::Receiver<Option<ExitInfo>>,
    err: AppError,
) -> AppError {
    if matches!(err, AppError::Transport(_) | AppError::Closed(_)) {
        let _ = tokio::time::timeout(EXIT_SETTLE, exit.wait_for(Option::is_some)).await;
    }
    match exit_failure(exit) {
        Some(exit_err) => exit_err,
        None => err,
    }
}

/// The subprocess exit error, if the agent has exited with a positive code.
pub(crate) fn exit_failure(exit: &watch::Receiver<Option<ExitInfo>>) -> Option<AppError> {
    let info = exit.borrow().clone();
    info.filter(ExitInfo::is_failure)
        .map(|info| AppError::SubprocessExit(info.description))
}
