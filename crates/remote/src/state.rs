// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Server state management.
//!
//! Holds the authoritative item set and the broadcast channel that fans
//! accepted changes out to every other session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use tally_core::protocol::ServerMessage;
use tally_core::{generate_version_hash, Error, Fields, Item, Result, VersionHash};

/// A message fanned out to every session except its origin.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub origin: u64,
    pub message: ServerMessage,
}

/// Outcome of writing an item under last-write-wins.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// The item was stored.
    Applied(Item),
    /// The stored item is newer. Carries the stored version.
    Stale(Item),
}

/// Shared server state containing the authoritative items.
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<ServerStateInner>,
}

struct ServerStateInner {
    fields: Fields,
    /// Items in insertion order.
    items: Mutex<Vec<Item>>,
    broadcast_tx: broadcast::Sender<Broadcast>,
    next_session: AtomicU64,
}

impl ServerState {
    /// Creates an empty state keyed by `fields`.
    pub fn with_fields(fields: Fields) -> Self {
        // Create broadcast channel with reasonable buffer
        let (broadcast_tx, _) = broadcast::channel(1024);
        ServerState {
            inner: Arc::new(ServerStateInner {
                fields,
                items: Mutex::new(Vec::new()),
                broadcast_tx,
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn fields(&self) -> &Fields {
        &self.inner.fields
    }

    /// Allocates an id for a new session.
    pub fn next_session_id(&self) -> u64 {
        self.inner.next_session.fetch_add(1, Ordering::Relaxed)
    }

    fn id_of(&self, item: &Item) -> Result<String> {
        item.id(&self.inner.fields.id)
            .ok_or_else(|| Error::InvalidItem(format!("missing '{}'", self.inner.fields.id)))
    }

    /// Stores `item` unless the stored version carries a later timestamp.
    ///
    /// Equal timestamps and items without a parseable timestamp are accepted.
    pub async fn upsert(&self, item: Item) -> Result<Upsert> {
        let id = self.id_of(&item)?;
        let field = &self.inner.fields.timestamp;
        let mut items = self.inner.items.lock().await;

        let existing = items
            .iter_mut()
            .find(|existing| existing.id(&self.inner.fields.id).as_deref() == Some(id.as_str()));
        match existing {
            Some(existing) => {
                if let (Some(incoming), Some(stored)) =
                    (item.timestamp_ms(field), existing.timestamp_ms(field))
                {
                    if incoming < stored {
                        return Ok(Upsert::Stale(existing.clone()));
                    }
                }
                *existing = item.clone();
            }
            None => items.push(item.clone()),
        }
        Ok(Upsert::Applied(item))
    }

    /// Removes the item with `id`, returning it.
    pub async fn remove(&self, id: &str) -> Option<Item> {
        let mut items = self.inner.items.lock().await;
        let index = items
            .iter()
            .position(|item| item.id(&self.inner.fields.id).as_deref() == Some(id))?;
        Some(items.remove(index))
    }

    /// Returns the authoritative items and their version hash.
    pub async fn snapshot(&self) -> (Vec<Item>, VersionHash) {
        let items = self.inner.items.lock().await.clone();
        let version = generate_version_hash(&items);
        (items, version)
    }

    /// Sends `message` to every session but `origin`.
    pub fn broadcast(&self, origin: u64, message: ServerMessage) {
        // No receivers just means no other sessions are open
        let _ = self.inner.broadcast_tx.send(Broadcast { origin, message });
    }

    /// Subscribe to broadcast messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::with_fields(Fields::default())
    }
}
