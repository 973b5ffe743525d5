// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

use crate::queue::QueueError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// All possible errors that can occur in the tally client.
///
/// Connection-level failures never reach callers as errors: they drive the
/// reconnect state machine and surface through [`crate::ConnectionState`].
/// What does reach callers is delivery failing for a specific operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Core(#[from] tally_core::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not connected to remote peer")]
    NotConnected,

    #[error("connection lost before acknowledgement")]
    Disconnected,

    #[error("no acknowledgement for '{event}' within {timeout_ms}ms")]
    AckTimeout { event: String, timeout_ms: u64 },

    #[error("not connected after {0}ms")]
    ConnectTimeout(u64),

    #[error("peer rejected '{event}': {message}")]
    Rejected { event: String, message: String },

    #[error("offline: update rolled back\n  hint: set offline_policy = \"keep_applied\" to queue updates while offline")]
    Offline,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no unresolved conflict for id: {0}")]
    UnknownConflict(String),
}

/// A specialized Result type for tally client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
