// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync state: the local item set, its freshness, and open conflicts.
//!
//! Every change to the item set, whether from a full sync, a peer event or
//! a local edit, is published through a watch channel as a [`SyncSnapshot`].
//! Remote data always goes through the conflict engine; conflicts it flags
//! are kept for presentation until resolved or dismissed.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tally_core::event::names;
use tally_core::protocol::{ack_error, ConflictNotice, PushChanges, SyncRequest, SyncResponse};
use tally_core::{
    detect_conflicts, generate_version_hash, merge_with_conflict_resolution, resolve_manually,
    ClockSource, Conflict, Item, MergeOptions, MergeResult, Source, SystemClock, VersionHash,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::registry::Subscription;
use crate::transport::{Transport, WebSocketTransport};

/// Published view of the sync state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub items: Vec<Item>,
    /// Completion time of the last full sync.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Flagged conflicts awaiting the user.
    pub conflicts: Vec<Conflict>,
    /// True while a full sync request is in flight.
    pub syncing: bool,
}

/// Keeps the local item set reconciled with the peer.
pub struct SyncStateManager<T: Transport + 'static = WebSocketTransport> {
    conn: Arc<ConnectionManager<T>>,
    options: MergeOptions,
    clock: Arc<dyn ClockSource>,
    state: watch::Sender<SyncSnapshot>,
    synced_version: Mutex<Option<VersionHash>>,
    /// Full syncs in flight; `syncing` is true while nonzero.
    syncs_in_flight: Mutex<usize>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Counts one full sync as in flight until dropped.
struct SyncInFlight<'a> {
    count: &'a Mutex<usize>,
    state: &'a watch::Sender<SyncSnapshot>,
}

impl<'a> SyncInFlight<'a> {
    fn begin(count: &'a Mutex<usize>, state: &'a watch::Sender<SyncSnapshot>) -> Self {
        let mut n = lock(count);
        *n += 1;
        state.send_modify(|s| s.syncing = true);
        SyncInFlight { count, state }
    }
}

impl Drop for SyncInFlight<'_> {
    fn drop(&mut self) {
        let mut n = lock(self.count);
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.state.send_modify(|s| s.syncing = false);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Transport + 'static> SyncStateManager<T> {
    pub fn new(conn: Arc<ConnectionManager<T>>, options: MergeOptions) -> Self {
        Self::with_clock(conn, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        conn: Arc<ConnectionManager<T>>,
        options: MergeOptions,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let (state, _) = watch::channel(SyncSnapshot::default());
        SyncStateManager {
            conn,
            options,
            clock,
            state,
            synced_version: Mutex::new(None),
            syncs_in_flight: Mutex::new(0),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.state.borrow().clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.state.borrow().items.clone()
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.state.borrow().conflicts.clone()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.state.borrow().last_sync_time
    }

    fn id_of(&self, item: &Item) -> Option<String> {
        item.id(&self.options.fields.id)
    }

    /// Replace the whole local set, e.g. when loading from a cache.
    pub fn replace_local(&self, items: Vec<Item>) {
        self.state.send_modify(|state| state.items = items);
    }

    /// Insert or replace one item by id.
    pub fn upsert_local(&self, item: Item) -> Result<()> {
        let id = self.id_of(&item).ok_or_else(|| {
            tally_core::Error::InvalidItem(format!("missing '{}' field", self.options.fields.id))
        })?;
        self.state.send_modify(|state| upsert(&mut state.items, &self.options, &id, item));
        Ok(())
    }

    /// Remove one item by id.
    pub fn remove_local(&self, id: &str) -> Option<Item> {
        let mut removed = None;
        self.state.send_if_modified(|state| {
            let position = state
                .items
                .iter()
                .position(|i| self.id_of(i).as_deref() == Some(id));
            let Some(index) = position else {
                return false;
            };
            removed = Some(state.items.remove(index));
            state.conflicts.retain(|c| c.id != id);
            true
        });
        removed
    }

    /// True if the local set differs from what the last full sync produced.
    ///
    /// Always true before the first full sync. Hash based, so a collision
    /// can hide a change.
    pub fn has_changes(&self) -> bool {
        let synced = lock(&self.synced_version).clone();
        match synced {
            Some(version) => generate_version_hash(&self.state.borrow().items) != version,
            None => true,
        }
    }

    /// Pull the authoritative set and merge it into the local one.
    pub async fn request_full_sync(&self) -> Result<MergeResult> {
        let request = {
            let state = self.state.borrow();
            SyncRequest {
                version: Some(generate_version_hash(&state.items)),
                last_sync: state.last_sync_time,
            }
        };
        let payload = serde_json::to_value(&request)?;

        let in_flight = SyncInFlight::begin(&self.syncs_in_flight, &self.state);
        let ack = self.conn.emit_with_ack(names::SYNC_FULL, payload).await;
        drop(in_flight);

        let ack = ack?;
        if let Some(message) = ack_error(&ack) {
            return Err(Error::Rejected {
                event: names::SYNC_FULL.to_string(),
                message,
            });
        }
        let response: SyncResponse = serde_json::from_value(ack)?;
        let result = self.apply_remote(&response.items, true);
        info!(
            items = result.items.len(),
            conflicts = result.conflicts,
            "full sync complete"
        );
        Ok(result)
    }

    /// Send local changes to the peer and return its acknowledgement.
    pub async fn push_changes(&self, changes: Vec<Item>) -> Result<Value> {
        let count = changes.len();
        let payload = serde_json::to_value(PushChanges { changes })?;
        let ack = self.conn.emit_with_ack(names::SYNC_PUSH, payload).await?;
        if let Some(message) = ack_error(&ack) {
            return Err(Error::Rejected {
                event: names::SYNC_PUSH.to_string(),
                message,
            });
        }
        debug!(count, "pushed changes");
        Ok(ack)
    }

    /// Merge remote items into the local set and publish the result.
    ///
    /// A full sync also stamps the sync time and records the version the
    /// merged set hashes to.
    pub fn apply_remote(&self, remote: &[Item], full_sync: bool) -> MergeResult {
        let mut result = MergeResult::default();
        self.state.send_modify(|state| {
            let detected = detect_conflicts(&state.items, remote, &self.options.fields);
            result = merge_with_conflict_resolution(&state.items, remote, &self.options);

            for (conflict, resolution) in detected.into_iter().zip(&result.resolutions) {
                state.conflicts.retain(|c| c.id != conflict.id);
                if resolution.is_flagged() {
                    state.conflicts.push(conflict);
                }
            }
            state.items = result.items.clone();

            if full_sync {
                state.last_sync_time = DateTime::from_timestamp_millis(self.clock.now_ms());
                *lock(&self.synced_version) = Some(generate_version_hash(&state.items));
            }
        });
        if result.conflicts > 0 {
            debug!(
                conflicts = result.conflicts,
                flagged = result.flagged().count(),
                "merged with conflicts"
            );
        }
        result
    }

    /// Settle a flagged conflict by picking one side.
    ///
    /// The chosen version replaces the local item. Returns it.
    pub fn resolve_conflict(&self, id: &str, choice: Source) -> Result<Item> {
        let mut outcome = Err(Error::UnknownConflict(id.to_string()));
        self.state.send_if_modified(|state| {
            let Some(index) = state.conflicts.iter().position(|c| c.id == id) else {
                return false;
            };
            let conflict = state.conflicts.remove(index);
            let resolution = resolve_manually(id, &conflict.local, &conflict.remote, choice);
            if let Some(winner) = resolution.winner() {
                upsert(&mut state.items, &self.options, id, winner.clone());
                outcome = Ok(winner.clone());
            }
            true
        });
        outcome
    }

    /// Accept the automatic resolution of a flagged conflict.
    pub fn dismiss_conflict(&self, id: &str) -> bool {
        self.state.send_if_modified(|state| {
            let before = state.conflicts.len();
            state.conflicts.retain(|c| c.id != id);
            state.conflicts.len() != before
        })
    }

    /// Route unsolicited peer events into the merge path.
    ///
    /// Idempotent; the subscriptions hold only a weak reference.
    pub fn attach(self: &Arc<Self>) {
        let mut subscriptions = lock(&self.subscriptions);
        if !subscriptions.is_empty() {
            return;
        }
        for event in [
            names::SYNC_FULL_RESPONSE,
            names::SYNC_CONFLICT,
            names::ENTITY_CREATED,
            names::ENTITY_UPDATED,
            names::ENTITY_DELETED,
        ] {
            let weak = Arc::downgrade(self);
            subscriptions.push(self.conn.on(event, move |data: &Value| {
                if let Some(this) = weak.upgrade() {
                    this.handle_event(event, data);
                }
            }));
        }
    }

    /// Stop listening to peer events.
    pub fn detach(&self) {
        for subscription in std::mem::take(&mut *lock(&self.subscriptions)) {
            subscription.unsubscribe();
        }
    }

    fn handle_event(&self, event: &str, data: &Value) {
        let handled: Result<()> = match event {
            names::SYNC_FULL_RESPONSE => serde_json::from_value::<SyncResponse>(data.clone())
                .map(|response| {
                    self.apply_remote(&response.items, true);
                })
                .map_err(Error::from),
            names::SYNC_CONFLICT => serde_json::from_value::<ConflictNotice>(data.clone())
                .map(|notice| {
                    self.apply_remote(&notice.items, false);
                })
                .map_err(Error::from),
            names::ENTITY_CREATED | names::ENTITY_UPDATED => Item::from_value(data.clone())
                .map(|item| {
                    self.apply_remote(&[item], false);
                })
                .map_err(Error::from),
            names::ENTITY_DELETED => {
                let id = match data {
                    Value::String(id) => Some(id.clone()),
                    other => Item::from_value(other.clone())
                        .ok()
                        .and_then(|item| self.id_of(&item)),
                };
                match id {
                    Some(id) => {
                        self.remove_local(&id);
                        Ok(())
                    }
                    None => Err(tally_core::Error::InvalidItem(data.to_string()).into()),
                }
            }
            _ => Ok(()),
        };
        if let Err(e) = handled {
            warn!(%event, error = %e, "ignoring malformed peer event");
        }
    }
}

fn upsert(items: &mut Vec<Item>, options: &MergeOptions, id: &str, item: Item) {
    match items
        .iter_mut()
        .find(|existing| existing.id(&options.fields.id).as_deref() == Some(id))
    {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

#[cfg(test)]
#[path = "sync_state_tests.rs"]
mod tests;
