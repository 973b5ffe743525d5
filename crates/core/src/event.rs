// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound events and the names of the events exchanged with the peer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names used on the wire.
pub mod names {
    /// An entity was created.
    pub const ENTITY_CREATED: &str = "entity:created";
    /// An entity was updated.
    pub const ENTITY_UPDATED: &str = "entity:updated";
    /// An entity was deleted. Payload carries at least the id field.
    pub const ENTITY_DELETED: &str = "entity:deleted";
    /// The peer reports conflicting versions of entities.
    pub const SYNC_CONFLICT: &str = "sync:conflict";
    /// Full sync request.
    pub const SYNC_FULL: &str = "sync:full";
    /// Full sync response, either as an ack or pushed unsolicited.
    pub const SYNC_FULL_RESPONSE: &str = "sync:full:response";
    /// Batch of local changes pushed to the peer.
    pub const SYNC_PUSH: &str = "sync:push";

    /// Local notification: handshake acknowledged.
    pub const CONNECTION_CONNECTED: &str = "connection:connected";
    /// Local notification: session lost.
    pub const CONNECTION_DISCONNECTED: &str = "connection:disconnected";
    /// Local notification: a reconnect attempt is scheduled.
    pub const CONNECTION_RECONNECTING: &str = "connection:reconnecting";
    /// Local notification: transport error.
    pub const CONNECTION_ERROR: &str = "connection:error";
}

/// An outbound operation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// Unique id, generated at enqueue time when empty.
    #[serde(default)]
    pub id: String,
    /// Event name, e.g. `entity:created`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
    /// Enqueue time in milliseconds since Unix epoch (0 when unset).
    #[serde(default)]
    pub timestamp: i64,
}

impl QueuedEvent {
    /// Creates an event with no id or timestamp; the queue assigns both.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        QueuedEvent {
            id: String::new(),
            event_type: event_type.into(),
            payload,
            timestamp: 0,
        }
    }

    /// Assigns a fresh id if none is set and returns it.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        &self.id
    }

    /// Assigns a fresh id and the given timestamp where they are unset.
    pub fn fill_missing(&mut self, now_ms: i64) {
        self.ensure_id();
        if self.timestamp == 0 {
            self.timestamp = now_ms;
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
