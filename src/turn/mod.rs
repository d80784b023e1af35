//! Turns: one prompt and the stream of messages it produces.
//!
//! A [`Turn`] is consumed as a sequence of [`Step`]s, each a sequence of
//! [`Message`]s. Both are forward-only and finite. Once the last step has
//! been taken, the turn finalizes: its [`result`](Turn::result),
//! [`err`](Turn::err), and [`usage`](Turn::usage) no longer change.
//!
//! Requests arriving inside a step must be answered through
//! [`PendingRequest::respond`](crate::wire::PendingRequest::respond); the
//! agent waits for the answer.

pub(crate) mod engine;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::session::sink::SinkSlot;
use crate::session::spawner::ExitInfo;
use crate::turn::engine::{exit_failure, prefer_exit};
use crate::wire::event::{StatusUpdate, TokenUsage};
use crate::wire::params::PromptResult;
use crate::wire::request::Message;
use crate::{AppError, Result};

/// Token and context accounting of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    /// Latest reported fraction of the context window in use.
    pub context: f64,
    /// Tokens summed over every usage report of the turn.
    pub tokens: TokenUsage,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between a turn and its background tasks.
#[derive(Debug, Default)]
pub(crate) struct TurnShared {
    usage: Mutex<Usage>,
    outcome: Mutex<Option<Result<PromptResult>>>,
    result: Mutex<PromptResult>,
    error: Mutex<Option<AppError>>,
}

impl TurnShared {
    pub(crate) fn apply_status(&self, update: &StatusUpdate) {
        let mut usage = lock(&self.usage);
        if let Some(context) = update.context_usage {
            usage.context = context;
        }
        if let Some(tokens) = &update.token_usage {
            usage.tokens.accumulate(tokens);
        }
    }

    pub(crate) fn store_outcome(&self, outcome: Result<PromptResult>) {
        *lock(&self.outcome) = Some(outcome);
    }

    pub(crate) fn outcome_error(&self) -> Option<AppError> {
        match lock(&self.outcome).as_ref() {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    fn take_outcome(&self) -> Option<Result<PromptResult>> {
        lock(&self.outcome).take()
    }
}

/// One agent step: the messages between two `StepBegin` markers.
#[derive(Debug)]
pub struct Step {
    n: u32,
    messages: mpsc::Receiver<Message>,
}

impl Step {
    pub(crate) fn new(n: u32, messages: mpsc::Receiver<Message>) -> Self {
        Self { n, messages }
    }

    /// Step number reported by the agent; `0` for messages that arrived
    /// before the first `StepBegin`.
    #[must_use]
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Next message of this step, or `None` once the step is over.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.messages.recv().await
    }
}

/// A live prompt/response exchange.
///
/// Dropping an unfinished turn cancels it.
#[derive(Debug)]
pub struct Turn {
    id: u64,
    token: CancellationToken,
    steps: mpsc::Receiver<Step>,
    current: Option<Step>,
    shared: Arc<TurnShared>,
    tasks: TaskTracker,
    slot: Arc<SinkSlot>,
    exit: watch::Receiver<Option<ExitInfo>>,
    finished: bool,
}

impl Turn {
    pub(crate) fn new(
        id: u64,
        token: CancellationToken,
        steps: mpsc::Receiver<Step>,
        shared: Arc<TurnShared>,
        tasks: TaskTracker,
        slot: Arc<SinkSlot>,
        exit: watch::Receiver<Option<ExitInfo>>,
    ) -> Self {
        Self {
            id,
            token,
            steps,
            current: None,
            shared,
            tasks,
            slot,
            exit,
            finished: false,
        }
    }

    /// Session-unique, monotonically increasing id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next step, or `None` when the turn is over. Returning `None`
    /// finalizes the turn.
    pub async fn next_step(&mut self) -> Option<Step> {
        if self.finished {
            return None;
        }
        self.current = None;
        match self.steps.recv().await {
            Some(step) => Some(step),
            None => {
                self.finish().await;
                None
            }
        }
    }

    /// Next message across step boundaries, or `None` when the turn is over.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            if let Some(step) = self.current.as_mut() {
                if let Some(message) = step.next_message().await {
                    return Some(message);
                }
            }
            let step = self.next_step().await?;
            self.current = Some(step);
        }
    }

    /// Terminal result; `pending` until the turn is finalized.
    #[must_use]
    pub fn result(&self) -> PromptResult {
        *lock(&self.shared.result)
    }

    /// Error that ended the turn, once finalized.
    #[must_use]
    pub fn err(&self) -> Option<AppError> {
        lock(&self.shared.error).clone()
    }

    /// Usage accumulated so far.
    #[must_use]
    pub fn usage(&self) -> Usage {
        *lock(&self.shared.usage)
    }

    /// `true` once the terminal result is fixed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Token that cancels this turn; usable from another task while this
    /// one is iterating.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the turn, discard undelivered messages, and finalize.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SubprocessExit`] if the agent died with a
    /// non-zero status.
    pub async fn cancel(&mut self) -> Result<()> {
        self.token.cancel();
        self.current = None;
        self.finish().await;
        match self.err() {
            Some(err @ AppError::SubprocessExit(_)) => Err(err),
            _ => Ok(()),
        }
    }

    async fn finish(&mut self) {
        if self.finished {
            return;
        }

        // Remaining steps are only left behind on cancellation.
        self.steps.close();
        while self.steps.recv().await.is_some() {}
        self.tasks.wait().await;

        let outcome = self
            .shared
            .take_outcome()
            .unwrap_or_else(|| Err(AppError::Transport("turn ended without a reply".into())));
        let (result, error) = match outcome {
            Ok(result) => (result, exit_failure(&self.exit)),
            Err(err) => (
                PromptResult::default(),
                Some(prefer_exit(&mut self.exit, err).await),
            ),
        };

        debug!(
            turn_id = self.id,
            status = %result.status,
            error = error.as_ref().map(ToString::to_string),
            "turn finalized"
        );
        *lock(&self.shared.result) = result;
        *lock(&self.shared.error) = error;
        self.slot.remove_live(self.id);
        self.finished = true;
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        if !self.finished {
            self.token.cancel();
            self.slot.remove_live(self.id);
        }
    }
}
