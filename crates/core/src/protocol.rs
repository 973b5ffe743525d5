// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol messages for client-peer communication.
//!
//! The protocol is a small event channel:
//! - Client opens a session with `hello`, the peer answers `welcome`
//! - Either side sends named events; a client event may ask for an `ack`
//! - `ping`/`pong` carry heartbeat ids for latency sampling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::VersionHash;
use crate::item::Item;

/// Messages sent from client to peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session handshake.
    Hello {
        /// Optional namespace the session is scoped to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    },

    /// A named event.
    Emit {
        event: String,
        #[serde(default)]
        data: Value,
        /// When set, the peer answers with an `ack` carrying this id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },

    /// Heartbeat ping.
    Ping {
        /// Client-chosen ID echoed in Pong.
        id: u64,
    },
}

/// Messages sent from peer to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledgement. The session is live from here on.
    Welcome {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    },

    /// A named event pushed by the peer.
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },

    /// Reply to an `emit` that asked for one.
    ///
    /// A payload with a non-null `error` field reports a rejection.
    Ack {
        id: u64,
        #[serde(default)]
        data: Value,
    },

    /// Heartbeat pong.
    Pong {
        /// Echoed from the Ping message.
        id: u64,
    },

    /// Error message not tied to an ack.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

impl ClientMessage {
    /// Creates a Hello message.
    pub fn hello(namespace: Option<String>) -> Self {
        ClientMessage::Hello { namespace }
    }

    /// Creates a fire-and-forget Emit message.
    pub fn emit(event: impl Into<String>, data: Value) -> Self {
        ClientMessage::Emit {
            event: event.into(),
            data,
            ack: None,
        }
    }

    /// Creates an Emit message that expects an ack.
    pub fn emit_with_ack(event: impl Into<String>, data: Value, ack: u64) -> Self {
        ClientMessage::Emit {
            event: event.into(),
            data,
            ack: Some(ack),
        }
    }

    /// Creates a Ping message.
    pub fn ping(id: u64) -> Self {
        ClientMessage::Ping { id }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Creates a Welcome message.
    pub fn welcome(namespace: Option<String>) -> Self {
        ServerMessage::Welcome { namespace }
    }

    /// Creates an Event message.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        ServerMessage::Event {
            event: event.into(),
            data,
        }
    }

    /// Creates an Ack message.
    pub fn ack(id: u64, data: Value) -> Self {
        ServerMessage::Ack { id, data }
    }

    /// Creates an Ack message reporting a rejection.
    pub fn ack_error(id: u64, message: impl Into<String>) -> Self {
        ServerMessage::Ack {
            id,
            data: serde_json::json!({ "error": message.into() }),
        }
    }

    /// Creates a Pong message.
    pub fn pong(id: u64) -> Self {
        ServerMessage::Pong { id }
    }

    /// Creates an Error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Returns the rejection message carried by an ack payload, if any.
pub fn ack_error(data: &Value) -> Option<String> {
    match data.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}

/// Payload of `sync:full`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncRequest {
    /// Hash of the client's collection at request time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionHash>,
    /// Time of the client's last completed sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// Payload of `sync:full:response`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncResponse {
    /// The authoritative collection.
    pub items: Vec<Item>,
    /// Hash of `items` as computed by the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionHash>,
}

/// Payload of `sync:push`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushChanges {
    pub changes: Vec<Item>,
}

/// Payload of `sync:conflict`: the peer's versions of contested items.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConflictNotice {
    pub items: Vec<Item>,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
