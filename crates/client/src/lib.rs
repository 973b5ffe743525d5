// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tally - Optimistic-update and real-time sync engine.
//!
//! Keeps a local copy of transaction records consistent with a remote
//! authoritative peer over an intermittently connected WebSocket channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────┐
//! │  Optimistic  │──►│   delivery   │──►│  Connection  │──►│  Peer  │
//! │ Coordinator  │◄──│ (emit/queue) │◄──│   Manager    │◄──│        │
//! └──────────────┘   └──────────────┘   └──────────────┘   └────────┘
//!                           │                  ▲
//!                           ▼                  │ events
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │ OfflineQueue │   │  SyncState   │──► conflict engine
//!                    │  (Storage)   │   │   Manager    │    (tally-core)
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! [`SyncEngine`] wires the pieces together: on every transition to
//! connected it replays the offline queue, then pulls a full sync.
//!
//! # Features
//!
//! - Automatic reconnect with capped exponential backoff
//! - Heartbeat latency sampling
//! - Acknowledged emits with a timeout
//! - Durable FIFO offline queue with replay on reconnect
//! - Command-based optimistic updates with exact rollback
//! - Pluggable conflict strategies with manual resolution
//! - Injectable transport and storage for testing

pub mod backoff;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod optimistic;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod sync_state;
pub mod transport;

pub use backoff::Backoff;
pub use config::{ClientConfig, OfflinePolicy};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, Status};
pub use delivery::{deliver, emit_with_queue, process_offline_queue, Delivery, EmitOptions};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use optimistic::{
    FnCommand, OptimisticCommand, OptimisticCoordinator, SnapshotCommand, UpdateOutcome,
};
pub use queue::OfflineQueue;
pub use registry::{Listeners, Subscription};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use sync_state::{SyncSnapshot, SyncStateManager};
pub use transport::{Transport, WebSocketTransport};

#[cfg(test)]
mod test_helpers;
