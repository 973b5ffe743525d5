// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Frame-level link between a client and the sync peer.
//!
//! [`ConnectionManager`](crate::connection::ConnectionManager) owns the
//! handshake, acks and reconnects; a [`Transport`] only moves protocol
//! frames. Tests plug in an in-memory peer in place of the WebSocket.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tally_core::protocol::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot reach sync peer: {0}")]
    Connect(String),

    /// The link is down, or was never opened.
    #[error("link to sync peer closed")]
    Closed,

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to read frame: {0}")]
    Receive(String),

    /// A frame did not encode or decode as a protocol message.
    #[error("bad frame: {0}")]
    Codec(String),

    /// No welcome within the connect timeout.
    #[error("handshake timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The peer answered hello with an error.
    #[error("peer rejected connection: {0}")]
    Rejected(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// One link to the sync peer, reopened by the connection driver after
/// every loss.
pub trait Transport: Send + Sync {
    /// Open the link to `url`. Sends nothing; the hello is the driver's job.
    fn connect(&mut self, url: &str) -> TransportFuture<'_, ()>;

    /// Close the link. Closing a closed link is not an error.
    fn disconnect(&mut self) -> TransportFuture<'_, ()>;

    fn send(&mut self, msg: ClientMessage) -> TransportFuture<'_, ()>;

    /// Next frame from the peer, or `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the driver races it against outbound traffic
    /// and heartbeats.
    fn recv(&mut self) -> TransportFuture<'_, Option<ServerMessage>>;

    fn is_connected(&self) -> bool;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON text frames over tokio-tungstenite.
#[derive(Default)]
pub struct WebSocketTransport {
    link: Option<Link>,
}

struct Link {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the link and hand back `err`.
    fn sever(&mut self, err: TransportError) -> TransportError {
        self.link = None;
        err
    }
}

impl Transport for WebSocketTransport {
    fn connect(&mut self, url: &str) -> TransportFuture<'_, ()> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws, _) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (sink, stream) = ws.split();
            self.link = Some(Link { sink, stream });
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut link) = self.link.take() {
                // The peer may already be gone
                let _ = link.sink.close().await;
            }
            Ok(())
        })
    }

    fn send(&mut self, msg: ClientMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let json = msg.to_json().map_err(|e| TransportError::Codec(e.to_string()))?;
            let link = self.link.as_mut().ok_or(TransportError::Closed)?;
            match link.sink.send(Message::Text(json.into())).await {
                Ok(()) => Ok(()),
                Err(e) => Err(self.sever(TransportError::Send(e.to_string()))),
            }
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, Option<ServerMessage>> {
        Box::pin(async move {
            let link = self.link.as_mut().ok_or(TransportError::Closed)?;
            let frame = loop {
                match link.stream.next().await {
                    Some(Ok(Message::Text(text))) => break Ok(text),
                    Some(Ok(Message::Close(_))) | None => {
                        self.link = None;
                        return Ok(None);
                    }
                    // Control and binary frames carry no protocol messages
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e),
                }
            };
            match frame {
                Ok(text) => ServerMessage::from_json(&text)
                    .map(Some)
                    .map_err(|e| TransportError::Codec(e.to_string())),
                Err(e) => Err(self.sever(TransportError::Receive(e.to_string()))),
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
