//! Unit tests for the sink slot: exclusive binding and live-turn tracking.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use agent_wire::session::sink::{LiveTurn, SinkSlot};

#[test]
fn only_one_turn_binds_at_a_time() {
    let slot = SinkSlot::new();
    let (tx, _rx) = mpsc::channel(1);

    let first = slot
        .try_acquire(1, tx.clone(), CancellationToken::new())
        .expect("free slot");
    assert_eq!(first.turn_id(), 1);
    assert_eq!(slot.bound_turn(), Some(1));
    assert!(slot
        .try_acquire(2, tx.clone(), CancellationToken::new())
        .is_none());

    first.release();
    assert_eq!(slot.bound_turn(), None);
    assert!(slot.try_acquire(2, tx, CancellationToken::new()).is_some());
}

#[test]
fn dropping_handle_unbinds() {
    let slot = SinkSlot::new();
    let (tx, _rx) = mpsc::channel(1);
    {
        let _handle = slot
            .try_acquire(7, tx, CancellationToken::new())
            .expect("free slot");
        assert!(slot.binding().is_some());
    }
    assert!(slot.binding().is_none());
}

#[test]
fn stale_release_does_not_unbind_newer_turn() {
    let slot = SinkSlot::new();
    let (tx, _rx) = mpsc::channel(1);

    let old = slot
        .try_acquire(1, tx.clone(), CancellationToken::new())
        .expect("free slot");
    old.release();
    let _new = slot
        .try_acquire(2, tx, CancellationToken::new())
        .expect("free slot");

    // Dropping the already-released handle must not touch turn 2.
    drop(old);
    assert_eq!(slot.bound_turn(), Some(2));
}

#[tokio::test]
async fn releasing_drops_the_relay_sender() {
    let slot = SinkSlot::new();
    let (tx, mut rx) = mpsc::channel::<agent_wire::Message>(1);
    let handle = slot
        .try_acquire(1, tx, CancellationToken::new())
        .expect("free slot");

    handle.release();
    assert!(rx.recv().await.is_none());
}

#[test]
fn live_turns_are_tracked_and_drained() {
    let slot = SinkSlot::new();
    for id in 1..=3 {
        slot.insert_live(
            id,
            LiveTurn {
                token: CancellationToken::new(),
                tasks: TaskTracker::new(),
            },
        );
    }
    slot.remove_live(2);
    assert_eq!(slot.live_count(), 2);

    let drained = slot.drain_live();
    assert_eq!(drained.len(), 2);
    assert_eq!(slot.live_count(), 0);
}
