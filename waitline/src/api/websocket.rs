//! WebSocket endpoint for live queue updates.
//!
//! # Protocol
//!
//! ## Connection
//!
//! ```text
//! ws://localhost:8080/ws
//! ws://localhost:8080/ws?customer_id=<uuid>     (enables join_personal)
//! ```
//!
//! Every connection is in the `global` room from the start.
//!
//! ## Client → Server
//!
//! ```json
//! {"type": "join_business", "business_id": "550e8400-..."}
//! {"type": "join_personal"}
//! {"type": "leave", "room": "business:550e8400-..."}
//! ```
//!
//! ## Server → Client
//!
//! Room events carry the room and the event name:
//! ```json
//! {"room": "business:550e8400-...", "type": "ticketCalled", "data": {"ticket": {}}}
//! ```
//!
//! Control replies:
//! ```json
//! {"type": "joined", "room": "user:660e8400-..."}
//! {"type": "error", "message": "Connect with customer_id to join your personal room"}
//! ```
//!
//! ## Connection Limits
//!
//! - `WS_MAX_CONNECTIONS` concurrent connections per instance (503 beyond)
//! - Ping every `WS_PING_INTERVAL` seconds
//! - Closed after `WS_IDLE_TIMEOUT` seconds without a pong or client message

#![allow(clippy::cognitive_complexity)] // Socket event loops

use super::identity::Caller;
use crate::fanout::{RoomBroadcaster, RoomEvent};
use crate::metrics;
use crate::server::state::AppState;
use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;
use waitline_core::events::{QueueEvent, Room};
use waitline_core::types::{BusinessId, CustomerId};

/// Active WebSocket connections on this instance.
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

type Sender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

// ============================================================================
// Message Types
// ============================================================================

/// Client → server message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Follow a business's queue
    JoinBusiness {
        /// Business to follow
        business_id: BusinessId,
    },
    /// Receive personal events (your ticket was called)
    JoinPersonal,
    /// Stop following a room
    Leave {
        /// Room name as sent in `joined`
        room: String,
    },
}

/// Server → client control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Room joined
    Joined {
        /// Room name
        room: String,
    },
    /// Room left
    Left {
        /// Room name
        room: String,
    },
    /// Request could not be honoured
    Error {
        /// Description
        message: String,
    },
}

/// A room event as sent on the wire
#[derive(Serialize)]
struct Envelope<'a> {
    room: &'a str,
    #[serde(flatten)]
    event: &'a QueueEvent,
}

/// Optional identity for browsers, which cannot set headers on upgrade
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Customer to bind `join_personal` to
    pub customer_id: Option<Uuid>,
}

// ============================================================================
// Handler
// ============================================================================

/// Upgrade to a WebSocket.
///
/// Returns 503 Service Unavailable when the connection limit is reached.
///
/// ```javascript
/// const ws = new WebSocket('ws://localhost:8080/ws?customer_id=660e8400-...');
/// ws.onopen = () => ws.send(JSON.stringify({type: 'join_business', business_id: '550e8400-...'}));
/// ws.onmessage = (event) => {
///   const msg = JSON.parse(event.data);
///   if (msg.type === 'yourTicketCalled') alert(msg.data.message);
/// };
/// ```
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Caller(header_identity): Caller,
    Query(query): Query<ConnectQuery>,
) -> Response {
    let limit = state.config.websocket.max_connections;
    let current = ACTIVE_CONNECTIONS.load(Ordering::Relaxed);
    if current >= limit {
        warn!(current, limit, "WebSocket connection limit reached");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Too many connections. Please try again later.",
        )
            .into_response();
    }

    let identity = header_identity.or_else(|| query.customer_id.map(CustomerId::from_uuid));
    ws.on_upgrade(move |socket| handle_socket(socket, identity, state))
}

/// Active WebSocket connections on this instance
#[must_use]
pub fn active_connection_count() -> usize {
    ACTIVE_CONNECTIONS.load(Ordering::Relaxed)
}

/// Counts a connection for as long as it lives
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        let count = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_connection_opened();
        info!(total_connections = count, "WebSocket connection established");
        Self
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::record_connection_closed();
        info!(total_connections = count, "WebSocket connection closed");
    }
}

/// Room forwarders of one connection; aborted together when dropped
#[derive(Default)]
struct Subscriptions(HashMap<String, JoinHandle<()>>);

impl Subscriptions {
    async fn join(&mut self, room: &Room, broadcaster: &RoomBroadcaster, sender: &Sender) -> String {
        let name = room.to_string();
        if !self.0.contains_key(&name) {
            let receiver = broadcaster.subscribe(&name).await;
            let task = tokio::spawn(forward_room(receiver, Arc::clone(sender)));
            self.0.insert(name.clone(), task);
        }
        name
    }

    fn leave(&mut self, room: &str) -> bool {
        self.0.remove(room).is_some_and(|task| {
            task.abort();
            true
        })
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for task in self.0.values() {
            task.abort();
        }
    }
}

async fn send_json<T: Serialize>(sender: &Sender, message: &T) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.lock().await.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WebSocket message");
            true
        }
    }
}

async fn forward_room(mut receiver: tokio::sync::broadcast::Receiver<RoomEvent>, sender: Sender) {
    loop {
        match receiver.recv().await {
            Ok(RoomEvent { room, event }) => {
                let envelope = Envelope {
                    room: &room,
                    event: &event,
                };
                if !send_json(&sender, &envelope).await {
                    debug!(%room, "Client disconnected during room stream");
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "WebSocket client lagging; events dropped");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn handle_client_message(
    text: &str,
    identity: Option<CustomerId>,
    rooms: &mut Subscriptions,
    broadcaster: &RoomBroadcaster,
    sender: &Sender,
) -> bool {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::JoinBusiness { business_id }) => ControlMessage::Joined {
            room: rooms
                .join(&Room::Business(business_id), broadcaster, sender)
                .await,
        },
        Ok(ClientMessage::JoinPersonal) => match identity {
            Some(customer_id) => ControlMessage::Joined {
                room: rooms
                    .join(&Room::Customer(customer_id), broadcaster, sender)
                    .await,
            },
            None => ControlMessage::Error {
                message: "Connect with customer_id to join your personal room".to_string(),
            },
        },
        Ok(ClientMessage::Leave { room }) => {
            if rooms.leave(&room) {
                broadcaster.prune().await;
                ControlMessage::Left { room }
            } else {
                ControlMessage::Error {
                    message: format!("Not in room {room}"),
                }
            }
        }
        Err(e) => ControlMessage::Error {
            message: format!("Unrecognized message: {e}"),
        },
    };
    send_json(sender, &reply).await
}

async fn handle_socket(socket: WebSocket, identity: Option<CustomerId>, state: AppState) {
    let _guard = ConnectionGuard::open();
    let ping_every = Duration::from_secs(state.config.websocket.ping_interval_secs.max(1));
    let idle_after = Duration::from_secs(state.config.websocket.idle_timeout_secs);

    let (sender, mut receiver) = socket.split();
    let sender: Sender = Arc::new(Mutex::new(sender));
    let broadcaster = state.broadcaster.clone();

    // Ping task for keep-alive
    let ping_sender = Arc::clone(&sender);
    let mut ping_task = tokio::spawn(async move {
        let mut ticker = interval(ping_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if ping_sender
                .lock()
                .await
                .send(Message::Ping(Vec::new()))
                .await
                .is_err()
            {
                break;
            }
        }
        debug!("WebSocket ping task terminated");
    });

    // Receive task owns the room subscriptions
    let recv_sender = Arc::clone(&sender);
    let mut recv_task = tokio::spawn(async move {
        let mut rooms = Subscriptions::default();
        rooms.join(&Room::Global, &broadcaster, &recv_sender).await;

        let timeout = tokio::time::sleep(idle_after);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                message = receiver.next() => {
                    let Some(Ok(message)) = message else {
                        debug!("WebSocket stream ended");
                        break;
                    };
                    timeout.as_mut().reset(Instant::now() + idle_after);
                    match message {
                        Message::Text(text) => {
                            if !handle_client_message(&text, identity, &mut rooms, &broadcaster, &recv_sender).await {
                                break;
                            }
                        }
                        Message::Pong(_) => debug!("Received pong from client"),
                        Message::Close(_) => {
                            info!("Client requested close");
                            break;
                        }
                        _ => debug!("Ignoring non-text WebSocket frame"),
                    }
                }
                () = &mut timeout => {
                    warn!("WebSocket idle timeout");
                    break;
                }
            }
        }

        debug!("WebSocket receive task terminated");
    });

    tokio::select! {
        _ = (&mut ping_task) => {
            debug!("Ping task completed, aborting receive task");
            recv_task.abort();
        },
        _ = (&mut recv_task) => {
            debug!("Receive task completed, aborting ping task");
            ping_task.abort();
        },
    }

    let _ = sender.lock().await.close().await;
}
