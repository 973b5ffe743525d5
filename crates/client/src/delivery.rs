// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Queue-aware delivery on top of the connection manager.

use serde_json::Value;
use tally_core::protocol::ack_error;
use tally_core::QueuedEvent;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::queue::OfflineQueue;
use crate::transport::Transport;

/// Where an emitted event ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Acknowledged by the peer, with the ack payload.
    Sent(Value),
    /// Persisted to the offline queue for later replay.
    Queued(QueuedEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOptions {
    pub queue_if_offline: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            queue_if_offline: true,
        }
    }
}

/// Emit with acknowledgement when connected; otherwise queue (or refuse).
///
/// An ack whose payload carries `error` is a rejection, not a success.
pub async fn emit_with_queue<T: Transport + 'static>(
    conn: &ConnectionManager<T>,
    queue: &OfflineQueue,
    event: &str,
    data: Value,
    options: EmitOptions,
) -> Result<Delivery> {
    deliver(conn, queue, QueuedEvent::new(event, data), options).await
}

/// Like [`emit_with_queue`], for an event built by the caller.
///
/// An id already set on `event` is kept if the event ends up queued.
pub async fn deliver<T: Transport + 'static>(
    conn: &ConnectionManager<T>,
    queue: &OfflineQueue,
    event: QueuedEvent,
    options: EmitOptions,
) -> Result<Delivery> {
    if conn.is_connected() {
        let ack = conn.emit_with_ack(&event.event_type, event.payload).await?;
        return check_ack(&event.event_type, ack).map(Delivery::Sent);
    }
    if !options.queue_if_offline {
        return Err(Error::NotConnected);
    }
    let queued = queue.enqueue(event)?;
    debug!(id = %queued.id, event = %queued.event_type, "offline, event queued");
    Ok(Delivery::Queued(queued))
}

/// Send one queued event and wait for its acknowledgement.
pub async fn replay_event<T: Transport + 'static>(
    conn: &ConnectionManager<T>,
    event: &QueuedEvent,
) -> Result<Value> {
    let ack = conn
        .emit_with_ack(&event.event_type, event.payload.clone())
        .await?;
    check_ack(&event.event_type, ack)
}

/// Drain the offline queue through the connection, oldest first.
///
/// Does nothing while disconnected. Stops at the first failure, leaving
/// that event at the head of the queue.
pub async fn process_offline_queue<T: Transport + 'static>(
    conn: &ConnectionManager<T>,
    queue: &OfflineQueue,
    cancel: &CancellationToken,
) -> Result<usize> {
    if !conn.is_connected() {
        return Ok(0);
    }
    queue
        .process_all(cancel, |event| async move {
            replay_event(conn, &event).await.map(|_| ())
        })
        .await
}

fn check_ack(event: &str, ack: Value) -> Result<Value> {
    match ack_error(&ack) {
        Some(message) => Err(Error::Rejected {
            event: event.to_string(),
            message,
        }),
        None => Ok(ack),
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
