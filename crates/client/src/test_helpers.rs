// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers: an in-memory peer and the transport that talks to it.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tally_core::protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

use crate::backoff::Backoff;
use crate::connection::{ConnectionConfig, ConnectionManager, Status};
use crate::transport::{Transport, TransportError, TransportFuture};

type Responder = Box<dyn Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync>;

/// Replies a cooperative peer would send: welcome, pong, `{"ok": true}` acks.
pub fn default_response(msg: &ClientMessage) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Hello { namespace } => vec![ServerMessage::welcome(namespace.clone())],
        ClientMessage::Ping { id } => vec![ServerMessage::pong(*id)],
        ClientMessage::Emit { ack: Some(id), .. } => {
            vec![ServerMessage::ack(*id, json!({"ok": true}))]
        }
        ClientMessage::Emit { ack: None, .. } => Vec::new(),
    }
}

/// The far end of every [`MockTransport`] it hands out.
///
/// Each successful connect opens a fresh channel; `drop_connection` closes
/// it from the peer side, which the client sees as the stream ending.
#[derive(Clone)]
pub struct MockPeer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    refuse: AtomicBool,
    fail_next: AtomicU32,
    connects: AtomicU32,
    sent: Mutex<Vec<ClientMessage>>,
    to_client: Mutex<Option<mpsc::UnboundedSender<ServerMessage>>>,
    responder: Mutex<Responder>,
}

impl MockPeer {
    pub fn new() -> Self {
        MockPeer {
            inner: Arc::new(PeerInner {
                refuse: AtomicBool::new(false),
                fail_next: AtomicU32::new(0),
                connects: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
                to_client: Mutex::new(None),
                responder: Mutex::new(Box::new(default_response)),
            }),
        }
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport {
            peer: self.clone(),
            rx: None,
        }
    }

    pub fn factory(&self) -> impl Fn() -> MockTransport + Send + Sync + 'static {
        let peer = self.clone();
        move || peer.transport()
    }

    /// Replace how the peer answers client messages.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&ClientMessage) -> Vec<ServerMessage> + Send + Sync + 'static,
    {
        *self.inner.responder.lock().unwrap() = Box::new(responder);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Push a message to the connected client. Returns false if none is.
    pub fn push(&self, msg: ServerMessage) -> bool {
        match self.inner.to_client.lock().unwrap().as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Close the current session from the peer side.
    pub fn drop_connection(&self) {
        self.inner.to_client.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Event names and payloads of every emit received, in order.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.sent()
            .into_iter()
            .filter_map(|msg| match msg {
                ClientMessage::Emit { event, data, .. } => Some((event, data)),
                _ => None,
            })
            .collect()
    }

    /// Ack id of the most recent emit of `event`.
    pub fn last_ack_id(&self, event: &str) -> Option<u64> {
        self.sent().into_iter().rev().find_map(|msg| match msg {
            ClientMessage::Emit {
                event: e,
                ack: Some(id),
                ..
            } if e == event => Some(id),
            _ => None,
        })
    }
}

/// In-memory transport connected to a [`MockPeer`].
pub struct MockTransport {
    peer: MockPeer,
    rx: Option<mpsc::UnboundedReceiver<ServerMessage>>,
}

impl Transport for MockTransport {
    fn connect(&mut self, _url: &str) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let inner = &self.peer.inner;
            if inner.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("refused".into()));
            }
            let pending_failures = inner.fail_next.load(Ordering::SeqCst);
            if pending_failures > 0 {
                inner.fail_next.store(pending_failures - 1, Ordering::SeqCst);
                return Err(TransportError::Connect("mock failure".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *inner.to_client.lock().unwrap() = Some(tx);
            inner.connects.fetch_add(1, Ordering::SeqCst);
            self.rx = Some(rx);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.rx = None;
            Ok(())
        })
    }

    fn send(&mut self, msg: ClientMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if self.rx.is_none() {
                return Err(TransportError::Closed);
            }
            let inner = &self.peer.inner;
            let replies = (inner.responder.lock().unwrap())(&msg);
            inner.sent.lock().unwrap().push(msg);
            if let Some(tx) = inner.to_client.lock().unwrap().as_ref() {
                for reply in replies {
                    let _ = tx.send(reply);
                }
            }
            Ok(())
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, Option<ServerMessage>> {
        Box::pin(async move {
            match self.rx.as_mut() {
                Some(rx) => Ok(rx.recv().await),
                None => Err(TransportError::Closed),
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.rx.is_some()
    }
}

/// Connection settings for tests: fast acks, no heartbeat.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        url: "ws://mock".into(),
        namespace: None,
        backoff: Backoff::default(),
        max_attempts: 0,
        connect_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::ZERO,
        ack_timeout: Duration::from_millis(200),
    }
}

/// A manager wired to `peer`, not yet connected.
pub fn manager(peer: &MockPeer) -> Arc<ConnectionManager<MockTransport>> {
    Arc::new(ConnectionManager::new(test_config(), peer.factory()))
}

/// A manager wired to `peer` and already connected.
pub async fn connected_manager(peer: &MockPeer) -> Arc<ConnectionManager<MockTransport>> {
    let conn = manager(peer);
    conn.connect(None);
    conn.wait_connected(Duration::from_secs(1)).await.unwrap();
    assert_eq!(conn.status().status, Status::Connected);
    conn
}

/// Poll `cond` until it holds, yielding to other tasks in between.
pub async fn eventually<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
