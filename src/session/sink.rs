//! The session's sink slot: which turn currently receives pushed messages,
//! plus the set of live turns for mass cancellation on close.
//!
//! One `std::sync::Mutex` guards both. It is only held for map and option
//! updates, never across an `.await`; the dispatcher clones the binding out
//! of the lock and sends without it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::wire::request::Message;

/// Delivery target of the bound turn.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Turn id.
    pub turn_id: u64,
    /// Relay into the turn's message stream.
    pub tx: mpsc::Sender<Message>,
    /// Fires when the turn is cancelled; pushes stop waiting on it.
    pub token: CancellationToken,
}

/// Cancellation handle and task set of a live turn.
#[derive(Debug, Clone)]
pub struct LiveTurn {
    /// Turn cancellation.
    pub token: CancellationToken,
    /// Background tasks of the turn.
    pub tasks: TaskTracker,
}

#[derive(Debug, Default)]
struct SlotState {
    bound: Option<Binding>,
    live: HashMap<u64, LiveTurn>,
}

/// Sink slot shared by the session, its dispatcher, and its turns.
#[derive(Debug, Default)]
pub struct SinkSlot {
    state: Mutex<SlotState>,
}

impl SinkSlot {
    /// Empty slot.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the slot to a turn. Returns `None` when another turn holds it.
    ///
    /// Binding is the only serialization point between concurrent prompts.
    #[must_use]
    pub fn try_acquire(
        self: &Arc<Self>,
        turn_id: u64,
        tx: mpsc::Sender<Message>,
        token: CancellationToken,
    ) -> Option<SinkHandle> {
        let mut state = self.lock();
        if state.bound.is_some() {
            return None;
        }
        state.bound = Some(Binding {
            turn_id,
            tx,
            token,
        });
        debug!(turn_id, "sink bound");
        Some(SinkHandle {
            slot: Arc::clone(self),
            turn_id,
            released: AtomicBool::new(false),
        })
    }

    /// Snapshot of the current binding.
    #[must_use]
    pub fn binding(&self) -> Option<Binding> {
        self.lock().bound.clone()
    }

    /// Id of the bound turn, if any.
    #[must_use]
    pub fn bound_turn(&self) -> Option<u64> {
        self.lock().bound.as_ref().map(|b| b.turn_id)
    }

    fn release(&self, turn_id: u64) {
        let mut state = self.lock();
        if state.bound.as_ref().is_some_and(|b| b.turn_id == turn_id) {
            state.bound = None;
            debug!(turn_id, "sink released");
        }
    }

    /// Record a live turn.
    pub fn insert_live(&self, turn_id: u64, turn: LiveTurn) {
        self.lock().live.insert(turn_id, turn);
    }

    /// Forget a live turn.
    pub fn remove_live(&self, turn_id: u64) {
        self.lock().live.remove(&turn_id);
    }

    /// Number of live turns.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Take every live turn out of the set.
    #[must_use]
    pub fn drain_live(&self) -> Vec<LiveTurn> {
        self.lock().live.drain().map(|(_, turn)| turn).collect()
    }
}

/// Ownership token for the bound slot. Releasing or dropping it unbinds,
/// which drops the slot's copy of the relay sender.
#[derive(Debug)]
pub struct SinkHandle {
    slot: Arc<SinkSlot>,
    turn_id: u64,
    released: AtomicBool,
}

impl SinkHandle {
    /// Turn that owns the slot.
    #[must_use]
    pub fn turn_id(&self) -> u64 {
        self.turn_id
    }

    /// Unbind now. Later calls and the eventual drop are no-ops.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.slot.release(self.turn_id);
        }
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        self.release();
    }
}
