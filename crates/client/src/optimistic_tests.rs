// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use super::*;
use crate::connection::ConnectionConfig;
use crate::storage::{MemoryStorage, Storage, StorageResult};
use crate::test_helpers::{
    connected_manager, default_response, manager, test_config, MockPeer, MockTransport,
};
use serde_json::json;
use std::time::Duration;
use tally_core::protocol::{ClientMessage, ServerMessage};
use tally_core::QueuedEvent;

type State = Arc<Mutex<Value>>;
type Log = Arc<Mutex<Vec<String>>>;

fn account() -> State {
    Arc::new(Mutex::new(json!({"id": "acct-1", "amount": 10})))
}

fn amount(state: &State) -> i64 {
    state.lock().unwrap()["amount"].as_i64().unwrap()
}

fn set_amount(state: &State, value: i64) -> impl OptimisticCommand + 'static {
    let (capture, mutate, restore) = (state.clone(), state.clone(), state.clone());
    SnapshotCommand::new(
        move || capture.lock().unwrap().clone(),
        move || {
            mutate.lock().unwrap()["amount"] = json!(value);
        },
        move |snapshot| *restore.lock().unwrap() = snapshot,
    )
}

struct Harness {
    coordinator: OptimisticCoordinator<MockTransport>,
    queue: Arc<OfflineQueue>,
    confirmed: Log,
    rolled_back: Log,
}

/// Storage that fails every write, and reports each attempted write to an
/// optional observer first.
#[derive(Default)]
struct ObservedStorage {
    inner: MemoryStorage,
    fail_writes: bool,
    observer: Mutex<Option<Box<dyn Fn(&str) + Send + Sync>>>,
}

impl ObservedStorage {
    fn failing() -> Self {
        ObservedStorage {
            fail_writes: true,
            ..Default::default()
        }
    }

    fn observe(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        *self.observer.lock().unwrap() = Some(Box::new(f));
    }
}

impl Storage for ObservedStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if let Some(observer) = &*self.observer.lock().unwrap() {
            observer(value);
        }
        if self.fail_writes {
            return Err(std::io::Error::other("disk full").into());
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.inner.remove(key)
    }
}

fn harness(conn: Arc<ConnectionManager<MockTransport>>, policy: OfflinePolicy) -> Harness {
    harness_with(conn, policy, Arc::new(MemoryStorage::new()))
}

fn harness_with(
    conn: Arc<ConnectionManager<MockTransport>>,
    policy: OfflinePolicy,
    storage: Arc<dyn Storage>,
) -> Harness {
    let queue = Arc::new(OfflineQueue::open(storage).unwrap());
    let confirmed: Log = Arc::default();
    let rolled_back: Log = Arc::default();
    let (c, r) = (confirmed.clone(), rolled_back.clone());
    let coordinator = OptimisticCoordinator::new(conn, queue.clone(), policy)
        .on_success(move |id| c.lock().unwrap().push(id.to_string()))
        .on_rollback(move |id| r.lock().unwrap().push(id.to_string()));
    Harness {
        coordinator,
        queue,
        confirmed,
        rolled_back,
    }
}

fn rejecting_peer() -> MockPeer {
    let peer = MockPeer::new();
    peer.respond_with(|msg| match msg {
        ClientMessage::Emit { ack: Some(id), .. } => {
            vec![ServerMessage::ack_error(*id, "insufficient funds")]
        }
        other => default_response(other),
    });
    peer
}

#[tokio::test]
async fn acknowledged_update_is_confirmed() {
    let peer = MockPeer::new();
    let h = harness(connected_manager(&peer).await, OfflinePolicy::KeepApplied);
    let state = account();

    let outcome = h
        .coordinator
        .create_optimistic_update(
            "u-1",
            set_amount(&state, 25),
            "entity:updated",
            json!({"id": "acct-1"}),
        )
        .await
        .unwrap();

    assert_eq!(outcome, UpdateOutcome::Confirmed(json!({"ok": true})));
    assert_eq!(amount(&state), 25);
    assert!(!h.coordinator.is_pending("u-1"));
    assert_eq!(*h.confirmed.lock().unwrap(), vec!["u-1"]);
    assert!(h.rolled_back.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_update_rolls_back_exactly() {
    let peer = rejecting_peer();
    let h = harness(connected_manager(&peer).await, OfflinePolicy::KeepApplied);
    let state = account();
    let before = state.lock().unwrap().clone();

    let err = h
        .coordinator
        .create_optimistic_update("u-1", set_amount(&state, -500), "entity:updated", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Rejected { .. }));
    assert_eq!(*state.lock().unwrap(), before);
    assert!(h.coordinator.pending_ids().is_empty());
    assert_eq!(*h.rolled_back.lock().unwrap(), vec!["u-1"]);
    assert!(h.confirmed.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn ack_timeout_rolls_back() {
    let peer = MockPeer::new();
    peer.respond_with(|msg| match msg {
        ClientMessage::Emit { .. } => Vec::new(),
        other => default_response(other),
    });
    let h = harness(connected_manager(&peer).await, OfflinePolicy::KeepApplied);
    let state = account();

    let err = h
        .coordinator
        .create_optimistic_update("u-1", set_amount(&state, 99), "entity:updated", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AckTimeout { .. }));
    assert_eq!(amount(&state), 10);
}

#[tokio::test]
async fn offline_update_stays_applied_until_replay() {
    let peer = MockPeer::new();
    let conn = manager(&peer);
    let h = harness(conn.clone(), OfflinePolicy::KeepApplied);
    let state = account();

    let outcome = h
        .coordinator
        .create_optimistic_update(
            "u-1",
            set_amount(&state, 40),
            "entity:updated",
            json!({"amount": 40}),
        )
        .await
        .unwrap();

    let UpdateOutcome::Queued { event_id } = outcome else {
        panic!("expected queued outcome");
    };
    assert_eq!(h.queue.peek()[0].id, event_id);
    assert_eq!(amount(&state), 40);
    assert!(h.coordinator.is_pending("u-1"));

    conn.connect(None);
    conn.wait_connected(Duration::from_secs(1)).await.unwrap();
    assert_eq!(h.coordinator.replay_offline_queue().await.unwrap(), 1);

    assert!(h.queue.is_empty());
    assert!(!h.coordinator.is_pending("u-1"));
    assert_eq!(*h.confirmed.lock().unwrap(), vec!["u-1"]);
    assert_eq!(amount(&state), 40);
    assert_eq!(peer.emitted(), vec![("entity:updated".to_string(), json!({"amount": 40}))]);
}

#[tokio::test]
async fn offline_update_with_rollback_policy() {
    let peer = MockPeer::new();
    let h = harness(manager(&peer), OfflinePolicy::Rollback);
    let state = account();

    let err = h
        .coordinator
        .create_optimistic_update("u-1", set_amount(&state, 40), "entity:updated", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Offline));
    assert!(h.queue.is_empty());
    assert_eq!(amount(&state), 10);
    assert_eq!(*h.rolled_back.lock().unwrap(), vec!["u-1"]);
}

#[tokio::test]
async fn offline_rollback_policy_never_touches_failing_storage() {
    let peer = MockPeer::new();
    let storage = Arc::new(ObservedStorage::failing());
    let h = harness_with(manager(&peer), OfflinePolicy::Rollback, storage);
    let state = account();

    let err = h
        .coordinator
        .create_optimistic_update("u-1", set_amount(&state, 40), "entity:updated", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Offline));
    assert_eq!(amount(&state), 10);
    assert!(h.coordinator.pending_ids().is_empty());
    assert_eq!(*h.rolled_back.lock().unwrap(), vec!["u-1"]);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn offline_enqueue_failure_rolls_back() {
    let peer = MockPeer::new();
    let storage = Arc::new(ObservedStorage::failing());
    let h = harness_with(manager(&peer), OfflinePolicy::KeepApplied, storage);
    let state = account();

    let err = h
        .coordinator
        .create_optimistic_update("u-1", set_amount(&state, 40), "entity:updated", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Queue(_)));
    assert_eq!(amount(&state), 10);
    assert!(h.coordinator.pending_ids().is_empty());
    assert_eq!(*h.rolled_back.lock().unwrap(), vec!["u-1"]);
}

#[tokio::test]
async fn queued_event_is_linked_before_it_is_persisted() {
    let peer = MockPeer::new();
    let storage = Arc::new(ObservedStorage::default());
    let h = Arc::new(harness_with(
        manager(&peer),
        OfflinePolicy::KeepApplied,
        storage.clone(),
    ));
    let state = account();

    // Every queued event must already resolve to its update when written
    let linked: Log = Arc::default();
    let (weak, sink) = (Arc::downgrade(&h), linked.clone());
    storage.observe(move |value| {
        let events: Vec<QueuedEvent> = serde_json::from_str(value).unwrap();
        let Some(h) = weak.upgrade() else {
            return;
        };
        for event in events {
            let update = h.coordinator.update_for_event(&event.id);
            sink.lock().unwrap().push(update.unwrap_or_default());
        }
    });

    let UpdateOutcome::Queued { event_id } = h
        .coordinator
        .create_optimistic_update("u-1", set_amount(&state, 40), "entity:updated", json!({}))
        .await
        .unwrap()
    else {
        panic!("expected queued outcome");
    };

    assert_eq!(*linked.lock().unwrap(), vec!["u-1"]);
    assert_eq!(h.coordinator.update_for_event(&event_id).as_deref(), Some("u-1"));
}

#[tokio::test]
async fn same_id_overwrite_targets_latest_snapshot() {
    let peer = MockPeer::new();
    let h = harness(manager(&peer), OfflinePolicy::KeepApplied);
    let state = account();

    for value in [20, 30] {
        h.coordinator
            .create_optimistic_update("u-1", set_amount(&state, value), "entity:updated", json!({}))
            .await
            .unwrap();
    }
    assert_eq!(h.coordinator.pending_ids(), vec!["u-1"]);
    assert_eq!(amount(&state), 30);

    // Rolling back restores what the second update saw, not the original
    assert!(h.coordinator.rollback("u-1"));
    assert_eq!(amount(&state), 20);
    assert!(!h.coordinator.rollback("u-1"));
}

#[tokio::test]
async fn discard_queued_rolls_back_linked_update() {
    let peer = MockPeer::new();
    let h = harness(manager(&peer), OfflinePolicy::KeepApplied);
    let state = account();

    let UpdateOutcome::Queued { event_id } = h
        .coordinator
        .create_optimistic_update("u-1", set_amount(&state, 70), "entity:updated", json!({}))
        .await
        .unwrap()
    else {
        panic!("expected queued outcome");
    };

    assert!(h.coordinator.discard_queued(&event_id).unwrap());
    assert!(h.queue.is_empty());
    assert_eq!(amount(&state), 10);
    assert_eq!(*h.rolled_back.lock().unwrap(), vec!["u-1"]);
    assert!(!h.coordinator.discard_queued(&event_id).unwrap());
}

#[tokio::test]
async fn confirm_and_rollback_are_exclusive() {
    let peer = MockPeer::new();
    let h = harness(manager(&peer), OfflinePolicy::KeepApplied);
    let state = account();
    h.coordinator
        .create_optimistic_update("u-1", set_amount(&state, 5), "entity:updated", json!({}))
        .await
        .unwrap();

    assert!(h.coordinator.confirm("u-1"));
    assert!(!h.coordinator.rollback("u-1"));
    assert!(!h.coordinator.confirm("u-1"));
    assert_eq!(amount(&state), 5);
    assert!(!h.coordinator.confirm("never-created"));
}

#[tokio::test]
async fn shutdown_cancels_in_flight_without_rollback() {
    let peer = MockPeer::new();
    peer.respond_with(|msg| match msg {
        ClientMessage::Emit { .. } => Vec::new(),
        other => default_response(other),
    });
    let config = ConnectionConfig {
        ack_timeout: Duration::from_secs(30),
        ..test_config()
    };
    let conn = Arc::new(ConnectionManager::new(config, peer.factory()));
    conn.connect(None);
    conn.wait_connected(Duration::from_secs(1)).await.unwrap();
    let h = Arc::new(harness(conn, OfflinePolicy::KeepApplied));
    let state = account();

    let task = {
        let h = h.clone();
        let command = set_amount(&state, 77);
        tokio::spawn(async move {
            h.coordinator
                .create_optimistic_update("u-1", command, "entity:updated", json!({}))
                .await
        })
    };
    crate::test_helpers::eventually(|| !peer.emitted().is_empty()).await;

    h.coordinator.shutdown();
    assert!(matches!(task.await.unwrap(), Err(Error::Cancelled)));
    assert_eq!(amount(&state), 77);
    assert!(h.coordinator.pending_ids().is_empty());
    assert!(h.rolled_back.lock().unwrap().is_empty());

    let again = h
        .coordinator
        .create_optimistic_update("u-2", set_amount(&state, 1), "entity:updated", json!({}))
        .await;
    assert!(matches!(again, Err(Error::Cancelled)));
    assert_eq!(amount(&state), 77);
}

#[test]
fn fn_command_runs_closures() {
    let state = account();
    let (a, r) = (state.clone(), state.clone());
    let mut command = FnCommand::new(
        move || a.lock().unwrap()["amount"] = json!(1),
        move || r.lock().unwrap()["amount"] = json!(10),
    );
    command.apply();
    assert_eq!(amount(&state), 1);
    command.rollback();
    assert_eq!(amount(&state), 10);
}

#[test]
fn snapshot_command_rollback_without_apply_is_noop() {
    let state = account();
    let mut command = set_amount(&state, 3);
    command.rollback();
    assert_eq!(amount(&state), 10);
}
