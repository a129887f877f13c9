//! Room-based real-time fan-out.
//!
//! Each room (`business:{id}`, `user:{id}`, `global`) has its own broadcast
//! channel, created lazily on first subscribe. Publishing never waits on
//! subscribers; a room without listeners drops the event. Rooms whose last
//! receiver went away are pruned periodically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use waitline_core::events::{QueueEvent, Room};

/// Buffered events per room before slow receivers start lagging
const ROOM_CAPACITY: usize = 1000;

type Rooms = Arc<RwLock<HashMap<String, broadcast::Sender<RoomEvent>>>>;

/// An event delivered to a room
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// Room the event was published to
    pub room: String,
    /// The event
    pub event: Arc<QueueEvent>,
}

/// Room-scoped broadcaster shared by the effect runner and WebSocket handlers
#[derive(Clone, Default)]
pub struct RoomBroadcaster {
    rooms: Rooms,
}

impl RoomBroadcaster {
    /// Create a broadcaster with no rooms
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to a room. Returns how many subscribers received it.
    pub async fn publish(&self, room: &Room, event: QueueEvent) -> usize {
        let name = room.to_string();
        let event = RoomEvent {
            room: name.clone(),
            event: Arc::new(event),
        };

        match self.rooms.read().await.get(&name) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to a room by name
    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<RoomEvent> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Drop rooms nobody listens to any more
    pub async fn prune(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|_, sender| sender.receiver_count() > 0);
        before - rooms.len()
    }

    /// Prune abandoned rooms every `every` until the handle is aborted
    pub fn spawn_pruner(&self, every: Duration) -> JoinHandle<()> {
        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pruned = broadcaster.prune().await;
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned abandoned rooms");
                }
            }
        })
    }

    /// Number of rooms with a channel
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
