// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Handles client connections, message routing, and broadcast fanout.
//! Each session must open with `hello`; after that, emits that carry an ack
//! id are answered with `ack`, and accepted changes are broadcast to every
//! other session.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use tally_core::event::names;
use tally_core::protocol::{
    ClientMessage, ConflictNotice, PushChanges, ServerMessage, SyncRequest, SyncResponse,
};
use tally_core::Item;

use crate::state::{ServerState, Upsert};

/// Run the WebSocket server on the given address.
pub async fn run(addr: SocketAddr, state: ServerState) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", addr);
    serve(listener, state)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;
    Ok(())
}

/// Accept connections from an already bound listener.
pub(crate) async fn serve(
    listener: TcpListener,
    state: ServerState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Per-connection protocol state.
pub(crate) struct Session {
    pub id: u64,
    pub greeted: bool,
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: ServerState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let mut session = Session {
        id: state.next_session_id(),
        greeted: false,
    };
    info!("New WebSocket connection from: {} (session {})", peer_addr, session.id);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut broadcast_rx = state.subscribe();

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for response in handle_client_message(&text, &mut session, &state).await {
                            let json = response.to_json()?;
                            ws_sink.send(Message::Text(json.into())).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {
                        // Ignore other message types (Binary, Pong, Frame)
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break;
                    }
                }
            }

            broadcast = broadcast_rx.recv() => {
                match broadcast {
                    Ok(broadcast) if broadcast.origin == session.id || !session.greeted => {}
                    Ok(broadcast) => {
                        let json = broadcast.message.to_json()?;
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            warn!("Failed to send broadcast to {}: {}", peer_addr, e);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} messages", peer_addr, n);
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    info!("Connection closed: {} (session {})", peer_addr, session.id);
    Ok(())
}

/// Process a client message and return the replies for its sender.
pub(crate) async fn handle_client_message(
    text: &str,
    session: &mut Session,
    state: &ServerState,
) -> Vec<ServerMessage> {
    let msg = match ClientMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => return vec![ServerMessage::error(format!("invalid message: {}", e))],
    };
    debug!("Received message: {:?}", msg);

    match msg {
        ClientMessage::Hello { namespace } => {
            session.greeted = true;
            vec![ServerMessage::welcome(namespace)]
        }

        ClientMessage::Ping { id } => vec![ServerMessage::pong(id)],

        ClientMessage::Emit { .. } if !session.greeted => {
            vec![ServerMessage::error("expected hello before emit")]
        }

        ClientMessage::Emit { event, data, ack } => {
            let mut replies = Vec::new();
            let outcome = handle_emit(&event, data, session.id, state, &mut replies).await;
            match (ack, outcome) {
                (Some(id), Ok(data)) => replies.push(ServerMessage::ack(id, data)),
                (Some(id), Err(message)) => replies.push(ServerMessage::ack_error(id, message)),
                (None, Ok(data)) if event == names::SYNC_FULL => {
                    replies.push(ServerMessage::event(names::SYNC_FULL_RESPONSE, data));
                }
                (None, Ok(_)) => {}
                (None, Err(message)) => replies.push(ServerMessage::error(message)),
            }
            replies
        }
    }
}

/// Apply one domain event. Returns the ack payload or a rejection message.
///
/// Messages for the sender that must precede the ack are pushed to `replies`.
async fn handle_emit(
    event: &str,
    data: Value,
    origin: u64,
    state: &ServerState,
    replies: &mut Vec<ServerMessage>,
) -> Result<Value, String> {
    match event {
        names::ENTITY_CREATED | names::ENTITY_UPDATED => {
            let item = Item::from_value(data).map_err(|e| e.to_string())?;
            match state.upsert(item).await.map_err(|e| e.to_string())? {
                Upsert::Applied(item) => {
                    let value = item.into_value();
                    state.broadcast(origin, ServerMessage::event(event, value.clone()));
                    Ok(json!({ "ok": true, "item": value }))
                }
                Upsert::Stale(current) => {
                    debug!("Rejected stale {} from session {}", event, origin);
                    replies.push(conflict_notice(vec![current])?);
                    Err("stale update: a newer version exists".to_string())
                }
            }
        }

        names::ENTITY_DELETED => {
            let id = match data {
                Value::String(id) => Some(id),
                other => Item::from_value(other)
                    .ok()
                    .and_then(|item| item.id(&state.fields().id)),
            };
            let Some(id) = id else {
                return Err("entity:deleted needs an id".to_string());
            };
            let removed = state.remove(&id).await.is_some();
            if removed {
                state.broadcast(origin, ServerMessage::event(event, Value::String(id)));
            }
            Ok(json!({ "ok": true, "removed": removed }))
        }

        names::SYNC_FULL => {
            let request: SyncRequest = match data {
                Value::Null => SyncRequest::default(),
                data => serde_json::from_value(data).map_err(|e| e.to_string())?,
            };
            let (items, version) = state.snapshot().await;
            if request.version.as_ref() == Some(&version) {
                debug!("Session {} already at version {}", origin, version);
            }
            let response = SyncResponse {
                items,
                version: Some(version),
            };
            let value = serde_json::to_value(response).map_err(|e| e.to_string())?;
            Ok(value)
        }

        names::SYNC_PUSH => {
            let push: PushChanges = serde_json::from_value(data).map_err(|e| e.to_string())?;
            let mut applied = 0usize;
            let mut stale = Vec::new();
            for item in push.changes {
                match state.upsert(item).await.map_err(|e| e.to_string())? {
                    Upsert::Applied(item) => {
                        applied += 1;
                        state.broadcast(
                            origin,
                            ServerMessage::event(names::ENTITY_UPDATED, item.into_value()),
                        );
                    }
                    Upsert::Stale(current) => stale.push(current),
                }
            }
            let conflicts = stale.len();
            if !stale.is_empty() {
                replies.push(conflict_notice(stale)?);
            }
            Ok(json!({ "ok": true, "applied": applied, "conflicts": conflicts }))
        }

        other => Err(format!("unknown event: {}", other)),
    }
}

fn conflict_notice(items: Vec<Item>) -> Result<ServerMessage, String> {
    let value = serde_json::to_value(ConflictNotice { items }).map_err(|e| e.to_string())?;
    Ok(ServerMessage::event(names::SYNC_CONFLICT, value))
}
