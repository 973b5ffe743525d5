// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable FIFO of operations recorded while disconnected.
//!
//! The whole queue is stored as one JSON array under
//! [`QUEUE_STORAGE_KEY`] and rewritten on every mutation. A mutation only
//! takes effect in memory once the rewrite succeeded, so the in-memory view
//! never runs ahead of what is on disk.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tally_core::{ClockSource, QueuedEvent, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{Storage, StorageError};

/// Storage key holding the serialized queue.
pub const QUEUE_STORAGE_KEY: &str = "offline_event_queue";

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Offline event queue.
pub struct OfflineQueue {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn ClockSource>,
    events: Mutex<VecDeque<QueuedEvent>>,
    // Serializes drains so two replays cannot reorder events
    draining: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    /// Open the queue, loading anything persisted by a previous run.
    pub fn open(storage: Arc<dyn Storage>) -> QueueResult<Self> {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    /// Open the queue with a custom clock for enqueue timestamps.
    pub fn with_clock(storage: Arc<dyn Storage>, clock: Arc<dyn ClockSource>) -> QueueResult<Self> {
        let events: VecDeque<QueuedEvent> = match storage.get(QUEUE_STORAGE_KEY)? {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)?,
            _ => VecDeque::new(),
        };
        if !events.is_empty() {
            info!(count = events.len(), "loaded offline queue");
        }
        Ok(OfflineQueue {
            storage,
            clock,
            events: Mutex::new(events),
            draining: tokio::sync::Mutex::new(()),
        })
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<QueuedEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut VecDeque<QueuedEvent>) -> R) -> QueueResult<R> {
        let mut events = self.events();
        let mut next = events.clone();
        let result = f(&mut next);
        self.storage
            .set(QUEUE_STORAGE_KEY, &serde_json::to_string(&next)?)?;
        *events = next;
        Ok(result)
    }

    /// Append an event, assigning an id and timestamp where missing.
    ///
    /// Returns the event as stored.
    pub fn enqueue(&self, mut event: QueuedEvent) -> QueueResult<QueuedEvent> {
        event.fill_missing(self.clock.now_ms());
        let stored = event.clone();
        self.mutate(|events| events.push_back(event))?;
        debug!(id = %stored.id, event = %stored.event_type, "queued offline event");
        Ok(stored)
    }

    /// Remove and return the head of the queue.
    pub fn dequeue(&self) -> QueueResult<Option<QueuedEvent>> {
        if self.events().is_empty() {
            return Ok(None);
        }
        self.mutate(|events| events.pop_front())
    }

    /// Copy of the queue contents, head first.
    pub fn peek(&self) -> Vec<QueuedEvent> {
        self.events().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    /// Drop the event with `id`, wherever it sits in the queue.
    pub fn remove(&self, id: &str) -> QueueResult<Option<QueuedEvent>> {
        if !self.events().iter().any(|e| e.id == id) {
            return Ok(None);
        }
        self.mutate(|events| {
            let index = events.iter().position(|e| e.id == id)?;
            events.remove(index)
        })
    }

    /// Drop every queued event.
    pub fn clear(&self) -> QueueResult<()> {
        self.mutate(VecDeque::clear)
    }

    fn requeue_front(&self, event: QueuedEvent) -> QueueResult<()> {
        self.mutate(|events| events.push_front(event))
    }

    /// Feed queued events to `processor` head first until the queue is empty.
    ///
    /// Each event is dequeued before processing. If the processor fails the
    /// event goes back to the head, the error is returned and the batch stops;
    /// later events stay queued. Cancellation is checked between events.
    /// Returns the number of events processed.
    pub async fn process_all<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut processor: F,
    ) -> Result<usize>
    where
        F: FnMut(QueuedEvent) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _drain = self.draining.lock().await;
        let mut processed = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(processed, "queue drain cancelled");
                break;
            }
            let Some(event) = self.dequeue()? else {
                break;
            };
            let id = event.id.clone();

            if let Err(e) = processor(event.clone()).await {
                warn!(id = %id, error = %e, "queued event failed, halting replay");
                self.requeue_front(event)?;
                return Err(e);
            }
            processed += 1;
        }

        if processed > 0 {
            info!(processed, "replayed offline queue");
        }
        Ok(processed)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
