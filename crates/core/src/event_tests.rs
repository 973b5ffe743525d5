// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use serde_json::json;

#[test]
fn fill_missing_assigns_unique_ids() {
    let mut a = QueuedEvent::new(names::ENTITY_CREATED, json!({"id": 1}));
    let mut b = QueuedEvent::new(names::ENTITY_CREATED, json!({"id": 1}));
    a.fill_missing(1000);
    b.fill_missing(1000);

    assert!(!a.id.is_empty());
    assert_ne!(a.id, b.id);
    assert_eq!(a.timestamp, 1000);
}

#[test]
fn fill_missing_keeps_existing_values() {
    let mut event = QueuedEvent {
        id: "evt-1".into(),
        event_type: names::ENTITY_UPDATED.into(),
        payload: json!(null),
        timestamp: 42,
    };
    event.fill_missing(1000);

    assert_eq!(event.id, "evt-1");
    assert_eq!(event.timestamp, 42);
}

#[test]
fn ensure_id_is_stable_and_leaves_timestamp_unset() {
    let mut event = QueuedEvent::new(names::ENTITY_UPDATED, json!({}));
    let id = event.ensure_id().to_string();

    assert!(!id.is_empty());
    assert_eq!(event.ensure_id(), id);
    assert_eq!(event.timestamp, 0);

    event.fill_missing(1000);
    assert_eq!(event.id, id);
    assert_eq!(event.timestamp, 1000);
}

#[test]
fn wire_format_uses_type_key() {
    let raw = json!({"type": "expense:created", "payload": {"amount": 3}});
    let event: QueuedEvent = serde_json::from_value(raw).unwrap();
    assert_eq!(event.event_type, "expense:created");
    assert!(event.id.is_empty());
    assert_eq!(event.timestamp, 0);

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "expense:created");
}
