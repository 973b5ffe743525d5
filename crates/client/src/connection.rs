// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager: one persistent channel to the remote peer.
//!
//! A background driver task owns the transport. It performs the
//! hello/welcome handshake, multiplexes outbound messages, inbound messages
//! and heartbeats with `tokio::select!`, and reconnects with capped
//! exponential backoff whenever the session is lost. Callers never see
//! transport errors directly; they observe them through [`ConnectionState`]
//! and the `connection:*` notifications.
//!
//! ```text
//! disconnected ──connect()──► connecting ──welcome──► connected
//!                                 │                      │
//!                               error ◄──── retry ──► reconnecting
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tally_core::event::names;
use tally_core::protocol::{ClientMessage, ServerMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::{Error, Result};
use crate::registry::{Listeners, Subscription};
use crate::transport::{Transport, TransportError, TransportResult, WebSocketTransport};

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Snapshot of the connection, published through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    pub status: Status,
    /// Reconnect attempts since the last established session.
    pub reconnect_attempts: u32,
    /// Round trip of the most recent heartbeat.
    pub latency_ms: u64,
    /// Message of the last transport error, while in [`Status::Error`].
    pub last_error: Option<String>,
}

/// Settings for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Namespace sent in the handshake when `connect` is given none.
    pub namespace: Option<String>,
    pub backoff: Backoff,
    /// Reconnect attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Limit on transport connect plus handshake.
    pub connect_timeout: Duration,
    /// Ping period while connected (zero disables the heartbeat).
    pub heartbeat_interval: Duration,
    /// Limit on waiting for an acknowledgement.
    pub ack_timeout: Duration,
}

type PendingAcks = HashMap<u64, oneshot::Sender<Value>>;

struct Shared {
    state: watch::Sender<ConnectionState>,
    listeners: Listeners,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    pending_acks: Mutex<PendingAcks>,
    next_ack: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn set_state(&self, status: Status, reconnect_attempts: u32, last_error: Option<String>) {
        self.state.send_modify(|state| {
            state.status = status;
            state.reconnect_attempts = reconnect_attempts;
            state.last_error = last_error;
        });
    }

    fn notify(&self, event: &str, data: Value) {
        self.listeners.dispatch(event, &data);
    }

    fn session_started(&self, outbound: mpsc::UnboundedSender<ClientMessage>) {
        *lock(&self.outbound) = Some(outbound);
        self.set_state(Status::Connected, 0, None);
        self.notify(names::CONNECTION_CONNECTED, Value::Null);
    }

    fn session_ended(&self) {
        lock(&self.outbound).take();
        // Dropping the senders fails every waiter with `Disconnected`
        let abandoned = std::mem::take(&mut *lock(&self.pending_acks));
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "failing pending acks");
        }
    }

    fn outbound(&self) -> Option<mpsc::UnboundedSender<ClientMessage>> {
        lock(&self.outbound).clone()
    }

    fn handle_message(&self, msg: ServerMessage, pending_ping: &mut Option<(u64, Instant)>) {
        match msg {
            ServerMessage::Event { event, data } => {
                debug!(%event, "received event");
                self.listeners.dispatch(&event, &data);
            }
            ServerMessage::Ack { id, data } => {
                if let Some(waiter) = lock(&self.pending_acks).remove(&id) {
                    let _ = waiter.send(data);
                } else {
                    debug!(id, "ack with no waiter");
                }
            }
            ServerMessage::Pong { id } => match pending_ping.take() {
                Some((ping_id, sent)) if ping_id == id => {
                    let latency_ms = u64::try_from(sent.elapsed().as_millis()).unwrap_or(u64::MAX);
                    self.state.send_modify(|state| state.latency_ms = latency_ms);
                }
                other => *pending_ping = other,
            },
            ServerMessage::Error { message } => {
                warn!(%message, "peer reported error");
                self.notify(names::CONNECTION_ERROR, json!({ "message": message }));
            }
            ServerMessage::Welcome { .. } => debug!("ignoring repeated welcome"),
        }
    }
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type TransportFactory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Owns one logical connection to the remote peer.
///
/// Construct it, share it behind an `Arc`, call [`connect`](Self::connect).
/// Dropping the manager stops the driver task.
pub struct ConnectionManager<T: Transport + 'static = WebSocketTransport> {
    config: ConnectionConfig,
    factory: TransportFactory<T>,
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl ConnectionManager<WebSocketTransport> {
    /// A manager that connects over WebSocket.
    pub fn websocket(config: ConnectionConfig) -> Self {
        Self::new(config, WebSocketTransport::new)
    }
}

impl<T: Transport + 'static> ConnectionManager<T> {
    /// Create a manager; `factory` builds a fresh transport per attempt.
    pub fn new<F>(config: ConnectionConfig, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(ConnectionState::default());
        ConnectionManager {
            config,
            factory: Arc::new(factory),
            shared: Arc::new(Shared {
                state,
                listeners: Listeners::new(),
                outbound: Mutex::new(None),
                pending_acks: Mutex::new(HashMap::new()),
                next_ack: AtomicU64::new(1),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Start connecting in the background. No-op while already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, namespace: Option<&str>) {
        let mut driver = lock(&self.driver);
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return;
        }

        let namespace = namespace
            .map(str::to_string)
            .or_else(|| self.config.namespace.clone());
        let cancel = CancellationToken::new();
        self.shared.set_state(Status::Connecting, 0, None);
        info!(url = %self.config.url, "connecting");

        let handle = tokio::spawn(run_driver(
            self.config.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.shared),
            namespace,
            cancel.clone(),
        ));
        *driver = Some(Driver { cancel, handle });
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&self) {
        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            driver.cancel.cancel();
            let _ = driver.handle.await;
            info!("disconnected");
        }
        self.shared.session_ended();
        self.shared.set_state(Status::Disconnected, 0, None);
    }

    pub fn status(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().status == Status::Connected
    }

    /// Receiver that observes every state change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the connection is established.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.watch_status();
        let connected = rx.wait_for(|s| s.status == Status::Connected);
        let outcome = tokio::time::timeout(timeout, connected).await;
        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => Err(Error::ConnectTimeout(duration_ms(timeout))),
        }
    }

    /// Subscribe to a peer event or a `connection:*` notification.
    ///
    /// Callbacks run on the driver task and must not block.
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.listeners.on(event, callback)
    }

    /// Fire-and-forget emit.
    pub fn emit(&self, event: &str, data: Value) -> Result<()> {
        let outbound = self.shared.outbound().ok_or(Error::NotConnected)?;
        outbound
            .send(ClientMessage::emit(event, data))
            .map_err(|_| Error::NotConnected)
    }

    /// Emit and wait for the peer's acknowledgement payload.
    pub async fn emit_with_ack(&self, event: &str, data: Value) -> Result<Value> {
        let outbound = self.shared.outbound().ok_or(Error::NotConnected)?;
        let id = self.shared.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending_acks).insert(id, tx);

        if outbound
            .send(ClientMessage::emit_with_ack(event, data, id))
            .is_err()
        {
            lock(&self.shared.pending_acks).remove(&id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                lock(&self.shared.pending_acks).remove(&id);
                warn!(%event, id, "ack timed out");
                Err(Error::AckTimeout {
                    event: event.to_string(),
                    timeout_ms: duration_ms(self.config.ack_timeout),
                })
            }
        }
    }
}

impl<T: Transport + 'static> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Some(driver) = lock(&self.driver).take() {
            driver.cancel.cancel();
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

enum SessionEnd {
    Cancelled,
    Lost(String),
}

/// Connect, run sessions, and reconnect until cancelled or out of attempts.
async fn run_driver<T: Transport>(
    config: ConnectionConfig,
    factory: TransportFactory<T>,
    shared: Arc<Shared>,
    namespace: Option<String>,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        let mut transport = factory();
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            result = open_session(&config, &mut transport, namespace.clone()) => result,
        };

        match opened {
            Ok(()) => {
                attempt = 0;
                info!(url = %config.url, "connected");
                let (tx, rx) = mpsc::unbounded_channel();
                shared.session_started(tx);

                let end = run_session(&config, &shared, &mut transport, rx, &cancel).await;
                shared.session_ended();
                let _ = transport.disconnect().await;

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Lost(reason) => {
                        warn!(%reason, "connection lost");
                        shared.notify(names::CONNECTION_DISCONNECTED, json!({ "reason": reason }));
                        attempt = attempt.saturating_add(1);
                        shared.set_state(Status::Reconnecting, attempt, None);
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "connect failed");
                attempt = attempt.saturating_add(1);
                shared.set_state(Status::Error, attempt, Some(message.clone()));
                shared.notify(names::CONNECTION_ERROR, json!({ "message": message }));
            }
        }

        if config.max_attempts > 0 && attempt > config.max_attempts {
            info!(attempts = config.max_attempts, "giving up on reconnect");
            break;
        }

        let delay = config.backoff.delay(attempt);
        shared.notify(
            names::CONNECTION_RECONNECTING,
            json!({ "attempt": attempt, "delay_ms": duration_ms(delay) }),
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        shared.set_state(Status::Reconnecting, attempt, None);
    }

    shared.set_state(Status::Disconnected, 0, None);
}

/// Transport connect plus hello/welcome, bounded by the connect timeout.
async fn open_session<T: Transport>(
    config: &ConnectionConfig,
    transport: &mut T,
    namespace: Option<String>,
) -> TransportResult<()> {
    let handshake = async {
        transport.connect(&config.url).await?;
        transport.send(ClientMessage::hello(namespace)).await?;
        loop {
            match transport.recv().await? {
                Some(ServerMessage::Welcome { .. }) => return Ok(()),
                Some(ServerMessage::Error { message }) => {
                    return Err(TransportError::Rejected(message))
                }
                Some(other) => debug!(?other, "ignoring message before welcome"),
                None => return Err(TransportError::Closed),
            }
        }
    };
    match tokio::time::timeout(config.connect_timeout, handshake).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(config.connect_timeout)),
    }
}

/// Pump one established session until it drops or is cancelled.
async fn run_session<T: Transport>(
    config: &ConnectionConfig,
    shared: &Shared,
    transport: &mut T,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let heartbeat_enabled = !config.heartbeat_interval.is_zero();
    let period = if heartbeat_enabled {
        config.heartbeat_interval
    } else {
        Duration::from_secs(3600)
    };
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending_ping: Option<(u64, Instant)> = None;
    let mut next_ping = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,

            Some(msg) = outbound.recv() => {
                debug!(?msg, "send");
                if let Err(e) = transport.send(msg).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }

            result = transport.recv() => match result {
                Ok(Some(msg)) => shared.handle_message(msg, &mut pending_ping),
                Ok(None) => return SessionEnd::Lost("connection closed".into()),
                Err(e) => return SessionEnd::Lost(e.to_string()),
            },

            _ = heartbeat.tick(), if heartbeat_enabled => {
                next_ping += 1;
                // A failed ping surfaces through recv; it never ends the session itself
                match transport.send(ClientMessage::ping(next_ping)).await {
                    Ok(()) => pending_ping = Some((next_ping, Instant::now())),
                    Err(e) => debug!(error = %e, "heartbeat send failed"),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
