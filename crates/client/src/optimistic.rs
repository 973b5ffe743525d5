// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Optimistic updates: apply locally now, reconcile with the peer later.
//!
//! Each update is an [`OptimisticCommand`] held in a pending ledger under
//! its update id until exactly one of confirm or rollback removes it.
//! Under [`OfflinePolicy::KeepApplied`] an update whose event was queued
//! offline stays pending and is confirmed when the queue replays; under
//! [`OfflinePolicy::Rollback`] nothing is queued and the update is undone.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tally_core::QueuedEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OfflinePolicy;
use crate::connection::ConnectionManager;
use crate::delivery::{deliver, replay_event, Delivery, EmitOptions};
use crate::error::{Error, Result};
use crate::queue::OfflineQueue;
use crate::transport::{Transport, WebSocketTransport};

/// A reversible local mutation.
///
/// `apply` runs once, before delivery. `rollback` runs at most once and must
/// restore exactly the state `apply` found.
pub trait OptimisticCommand: Send {
    fn apply(&mut self);
    fn rollback(&mut self);
}

/// Command built from an apply/rollback closure pair.
pub struct FnCommand<A, R> {
    apply: A,
    rollback: R,
}

impl<A, R> FnCommand<A, R>
where
    A: FnMut() + Send,
    R: FnMut() + Send,
{
    pub fn new(apply: A, rollback: R) -> Self {
        FnCommand { apply, rollback }
    }
}

impl<A, R> OptimisticCommand for FnCommand<A, R>
where
    A: FnMut() + Send,
    R: FnMut() + Send,
{
    fn apply(&mut self) {
        (self.apply)()
    }

    fn rollback(&mut self) {
        (self.rollback)()
    }
}

/// Command that snapshots state before mutating and restores the snapshot
/// on rollback.
pub struct SnapshotCommand<S, C, A, R> {
    capture: Option<C>,
    mutate: Option<A>,
    restore: R,
    snapshot: Option<S>,
}

impl<S, C, A, R> SnapshotCommand<S, C, A, R>
where
    S: Send,
    C: FnOnce() -> S + Send,
    A: FnOnce() + Send,
    R: FnMut(S) + Send,
{
    pub fn new(capture: C, mutate: A, restore: R) -> Self {
        SnapshotCommand {
            capture: Some(capture),
            mutate: Some(mutate),
            restore,
            snapshot: None,
        }
    }
}

impl<S, C, A, R> OptimisticCommand for SnapshotCommand<S, C, A, R>
where
    S: Send,
    C: FnOnce() -> S + Send,
    A: FnOnce() + Send,
    R: FnMut(S) + Send,
{
    fn apply(&mut self) {
        if let Some(capture) = self.capture.take() {
            self.snapshot = Some(capture());
        }
        if let Some(mutate) = self.mutate.take() {
            mutate();
        }
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            (self.restore)(snapshot);
        }
    }
}

struct PendingUpdate {
    event: String,
    queued_event_id: Option<String>,
    command: Box<dyn OptimisticCommand>,
}

impl fmt::Debug for PendingUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpdate")
            .field("event", &self.event)
            .field("queued_event_id", &self.queued_event_id)
            .finish_non_exhaustive()
    }
}

/// Result of a successful optimistic update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The peer acknowledged; the update is committed.
    Confirmed(Value),
    /// Queued offline; the update stays applied and pending.
    Queued { event_id: String },
}

type UpdateHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Applies, tracks, and reconciles optimistic updates.
pub struct OptimisticCoordinator<T: Transport + 'static = WebSocketTransport> {
    conn: Arc<ConnectionManager<T>>,
    queue: Arc<OfflineQueue>,
    policy: OfflinePolicy,
    ledger: Mutex<HashMap<String, PendingUpdate>>,
    on_success: Option<UpdateHook>,
    on_rollback: Option<UpdateHook>,
    cancel: CancellationToken,
}

impl<T: Transport + 'static> OptimisticCoordinator<T> {
    pub fn new(
        conn: Arc<ConnectionManager<T>>,
        queue: Arc<OfflineQueue>,
        policy: OfflinePolicy,
    ) -> Self {
        OptimisticCoordinator {
            conn,
            queue,
            policy,
            ledger: Mutex::new(HashMap::new()),
            on_success: None,
            on_rollback: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Called with the update id whenever an update is confirmed.
    pub fn on_success(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Called with the update id whenever an update is rolled back.
    pub fn on_rollback(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_rollback = Some(Arc::new(hook));
        self
    }

    fn ledger(&self) -> MutexGuard<'_, HashMap<String, PendingUpdate>> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `command` locally, then deliver `event`.
    ///
    /// Reusing an update id that is still pending replaces its entry: the
    /// newest command becomes the rollback target.
    pub async fn create_optimistic_update<C>(
        &self,
        update_id: impl Into<String>,
        mut command: C,
        event: &str,
        data: Value,
    ) -> Result<UpdateOutcome>
    where
        C: OptimisticCommand + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let update_id = update_id.into();

        // The event id is linked before the event can reach the queue
        let mut outbound = QueuedEvent::new(event, data);
        let queue_if_offline = self.policy == OfflinePolicy::KeepApplied;
        let queued_event_id = queue_if_offline.then(|| outbound.ensure_id().to_string());

        command.apply();
        let replaced = self.ledger().insert(
            update_id.clone(),
            PendingUpdate {
                event: event.to_string(),
                queued_event_id,
                command: Box::new(command),
            },
        );
        if replaced.is_some() {
            debug!(%update_id, "replaced pending update");
        }

        let options = EmitOptions { queue_if_offline };
        let delivery = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = deliver(&self.conn, &self.queue, outbound, options) => result,
        };

        match delivery {
            Ok(Delivery::Sent(ack)) => {
                self.confirm(&update_id);
                Ok(UpdateOutcome::Confirmed(ack))
            }
            Ok(Delivery::Queued(queued)) => {
                info!(%update_id, event_id = %queued.id, "update queued offline");
                Ok(UpdateOutcome::Queued { event_id: queued.id })
            }
            Err(Error::NotConnected) if !queue_if_offline => {
                info!(%update_id, "offline, rolling back update");
                self.rollback(&update_id);
                Err(Error::Offline)
            }
            Err(e) => {
                warn!(%update_id, error = %e, "update failed, rolling back");
                self.rollback(&update_id);
                Err(e)
            }
        }
    }

    /// Commit a pending update. Returns false if it was not pending.
    pub fn confirm(&self, update_id: &str) -> bool {
        let Some(_) = self.ledger().remove(update_id) else {
            return false;
        };
        debug!(%update_id, "update confirmed");
        if let Some(hook) = &self.on_success {
            hook(update_id);
        }
        true
    }

    /// Undo a pending update. Returns false if it was not pending.
    pub fn rollback(&self, update_id: &str) -> bool {
        let Some(mut pending) = self.ledger().remove(update_id) else {
            return false;
        };
        pending.command.rollback();
        debug!(%update_id, event = %pending.event, "update rolled back");
        if let Some(hook) = &self.on_rollback {
            hook(update_id);
        }
        true
    }

    pub fn is_pending(&self, update_id: &str) -> bool {
        self.ledger().contains_key(update_id)
    }

    /// Ids of all pending updates, sorted.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ledger().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn update_for_event(&self, event_id: &str) -> Option<String> {
        self.ledger()
            .iter()
            .find(|(_, p)| p.queued_event_id.as_deref() == Some(event_id))
            .map(|(id, _)| id.clone())
    }

    /// Replay the offline queue, confirming the updates linked to each
    /// replayed event. No-op while disconnected.
    pub async fn replay_offline_queue(&self) -> Result<usize> {
        if !self.conn.is_connected() {
            return Ok(0);
        }
        self.queue
            .process_all(&self.cancel, |event| async move {
                replay_event(&self.conn, &event).await?;
                if let Some(update_id) = self.update_for_event(&event.id) {
                    self.confirm(&update_id);
                }
                Ok(())
            })
            .await
    }

    /// Drop a queued event and roll back the update linked to it.
    ///
    /// Returns false if no such event was queued.
    pub fn discard_queued(&self, event_id: &str) -> Result<bool> {
        if self.queue.remove(event_id)?.is_none() {
            return Ok(false);
        }
        if let Some(update_id) = self.update_for_event(event_id) {
            self.rollback(&update_id);
        }
        Ok(true)
    }

    /// Stop in-flight deliveries and forget pending updates.
    ///
    /// Nothing is rolled back: the local state may be gone by now, and
    /// queued events still replay on the next run.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let dropped = std::mem::take(&mut *self.ledger());
        if !dropped.is_empty() {
            info!(count = dropped.len(), "discarding pending updates on shutdown");
        }
    }
}

#[cfg(test)]
#[path = "optimistic_tests.rs"]
mod tests;
