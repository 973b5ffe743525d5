// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync engine: wires the connection, queue, coordinator and sync state.
//!
//! Every time a session is established the engine replays the offline
//! queue and then pulls a full sync, so updates made offline reach the peer
//! before the authoritative set is merged back in.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tally_core::event::names;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::Result;
use crate::optimistic::{OptimisticCommand, OptimisticCoordinator, UpdateOutcome};
use crate::queue::OfflineQueue;
use crate::registry::Subscription;
use crate::storage::{FileStorage, Storage};
use crate::sync_state::SyncStateManager;
use crate::transport::{Transport, WebSocketTransport};

/// The assembled client.
pub struct SyncEngine<T: Transport + 'static = WebSocketTransport> {
    connection: Arc<ConnectionManager<T>>,
    queue: Arc<OfflineQueue>,
    coordinator: Arc<OptimisticCoordinator<T>>,
    sync: Arc<SyncStateManager<T>>,
    resync_interval: Option<Duration>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    sessions: Mutex<Option<Subscription>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SyncEngine<WebSocketTransport> {
    /// Build a WebSocket engine with its queue in `config.storage_dir()`.
    pub fn open(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(FileStorage::open(&config.storage_dir())?);
        Self::with_transport(config, storage, WebSocketTransport::new)
    }
}

impl<T: Transport + 'static> SyncEngine<T> {
    /// Build an engine over any transport and storage.
    pub fn with_transport<F>(
        config: &ClientConfig,
        storage: Arc<dyn Storage>,
        factory: F,
    ) -> Result<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let connection = Arc::new(ConnectionManager::new(config.connection(), factory));
        let queue = Arc::new(OfflineQueue::open(storage)?);
        let coordinator = Arc::new(OptimisticCoordinator::new(
            Arc::clone(&connection),
            Arc::clone(&queue),
            config.offline_policy,
        ));
        let sync = Arc::new(SyncStateManager::new(
            Arc::clone(&connection),
            config.merge.clone(),
        ));
        Ok(Self::with_parts(
            connection,
            queue,
            coordinator,
            sync,
            config.resync_interval(),
        ))
    }

    /// Assemble an engine from prebuilt parts, e.g. a coordinator with hooks.
    pub fn with_parts(
        connection: Arc<ConnectionManager<T>>,
        queue: Arc<OfflineQueue>,
        coordinator: Arc<OptimisticCoordinator<T>>,
        sync: Arc<SyncStateManager<T>>,
        resync_interval: Option<Duration>,
    ) -> Self {
        SyncEngine {
            connection,
            queue,
            coordinator,
            sync,
            resync_interval,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            sessions: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<T>> {
        &self.connection
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<OptimisticCoordinator<T>> {
        &self.coordinator
    }

    pub fn sync(&self) -> &Arc<SyncStateManager<T>> {
        &self.sync
    }

    pub fn status(&self) -> ConnectionState {
        self.connection.status()
    }

    /// Shorthand for [`OptimisticCoordinator::create_optimistic_update`].
    pub async fn update<C>(
        &self,
        update_id: impl Into<String>,
        command: C,
        event: &str,
        data: Value,
    ) -> Result<UpdateOutcome>
    where
        C: OptimisticCommand + 'static,
    {
        self.coordinator
            .create_optimistic_update(update_id, command, event, data)
            .await
    }

    /// Connect and start the background loop.
    ///
    /// Must be called from within a tokio runtime. An engine that was shut
    /// down stays down.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if self.connection.is_connected() {
            let _ = tx.send(());
        }
        let on_connected = self
            .connection
            .on(names::CONNECTION_CONNECTED, move |_: &Value| {
                let _ = tx.send(());
            });
        *lock(&self.sessions) = Some(on_connected);
        self.sync.attach();
        self.connection.connect(None);

        *task = Some(tokio::spawn(run_engine(
            Arc::clone(&self.connection),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.sync),
            self.resync_interval,
            rx,
            self.cancel.clone(),
        )));
        info!("sync engine started");
    }

    /// Stop every background task and close the connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.coordinator.shutdown();
        self.sync.detach();
        if let Some(subscription) = lock(&self.sessions).take() {
            subscription.unsubscribe();
        }
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.connection.disconnect().await;
        info!("sync engine stopped");
    }
}

async fn run_engine<T: Transport + 'static>(
    conn: Arc<ConnectionManager<T>>,
    coordinator: Arc<OptimisticCoordinator<T>>,
    sync: Arc<SyncStateManager<T>>,
    resync_interval: Option<Duration>,
    mut sessions: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    let period = resync_interval.unwrap_or(Duration::from_secs(3600));
    let mut resync = tokio::time::interval_at(Instant::now() + period, period);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(()) = sessions.recv() => {
                // Sessions that came and went meanwhile need only one pass
                while sessions.try_recv().is_ok() {}
                if !conn.is_connected() {
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = reconcile(&coordinator, &sync) => {}
                }
            }

            _ = resync.tick(), if resync_interval.is_some() => {
                if conn.is_connected() {
                    if let Err(e) = sync.request_full_sync().await {
                        warn!(error = %e, "periodic sync failed");
                    }
                }
            }
        }
    }
}

/// Replay offline work, then pull the authoritative set.
async fn reconcile<T: Transport + 'static>(
    coordinator: &OptimisticCoordinator<T>,
    sync: &SyncStateManager<T>,
) {
    match coordinator.replay_offline_queue().await {
        Ok(0) => {}
        Ok(replayed) => info!(replayed, "offline queue replayed"),
        Err(e) => warn!(error = %e, "offline replay halted"),
    }
    if let Err(e) = sync.request_full_sync().await {
        warn!(error = %e, "full sync failed");
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
