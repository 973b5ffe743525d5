// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move |_: &Value| {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn dispatch_reaches_only_matching_event() {
    let listeners = Listeners::new();
    let (created, on_created) = counter();
    let (deleted, on_deleted) = counter();
    let _a = listeners.on("entity:created", on_created);
    let _b = listeners.on("entity:deleted", on_deleted);

    assert_eq!(listeners.dispatch("entity:created", &json!({})), 1);
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(deleted.load(Ordering::SeqCst), 0);
}

#[test]
fn dispatch_passes_payload_in_subscription_order() {
    let listeners = Listeners::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let seen = Arc::clone(&seen);
        let _ = listeners.on("entity:updated", move |data: &Value| {
            seen.lock().unwrap().push(format!("{tag}:{}", data["id"]));
        });
    }

    listeners.dispatch("entity:updated", &json!({"id": 7}));
    assert_eq!(*seen.lock().unwrap(), vec!["first:7", "second:7"]);
}

#[test]
fn unsubscribe_stops_delivery() {
    let listeners = Listeners::new();
    let (count, callback) = counter();
    let sub = listeners.on("sync:conflict", callback);
    assert_eq!(sub.event(), "sync:conflict");

    assert!(sub.unsubscribe());
    assert_eq!(listeners.dispatch("sync:conflict", &json!(null)), 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(listeners.listener_count("sync:conflict"), 0);
}

#[test]
fn unsubscribe_during_dispatch_is_safe() {
    let listeners = Listeners::new();
    let (later_count, later) = counter();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let slot_in_cb = Arc::clone(&slot);
    let _first = listeners.on("entity:created", move |_: &Value| {
        if let Some(sub) = slot_in_cb.lock().unwrap().take() {
            assert!(sub.unsubscribe());
        }
    });
    *slot.lock().unwrap() = Some(listeners.on("entity:created", later));

    // The snapshot taken before the first callback still includes the second
    assert_eq!(listeners.dispatch("entity:created", &json!({})), 2);
    assert_eq!(later_count.load(Ordering::SeqCst), 1);

    // From then on it is gone
    assert_eq!(listeners.dispatch("entity:created", &json!({})), 1);
    assert_eq!(later_count.load(Ordering::SeqCst), 1);
}

#[test]
fn subscribe_during_dispatch_does_not_deadlock() {
    let listeners = Listeners::new();
    let inner = listeners.clone();
    let _sub = listeners.on("sync:full:response", move |_: &Value| {
        let _ = inner.on("sync:full:response", |_: &Value| {});
    });

    assert_eq!(listeners.dispatch("sync:full:response", &json!({})), 1);
    assert_eq!(listeners.listener_count("sync:full:response"), 2);
}

#[test]
fn double_unsubscribe_reports_false() {
    let listeners = Listeners::new();
    let a = listeners.on("x", |_: &Value| {});
    let b = listeners.on("x", |_: &Value| {});
    assert!(a.unsubscribe());
    assert_eq!(listeners.listener_count("x"), 1);
    assert!(b.unsubscribe());

    let c = listeners.on("y", |_: &Value| {});
    drop(listeners);
    assert!(!c.unsubscribe());
}
