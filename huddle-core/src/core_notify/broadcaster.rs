//! Room-scoped real-time broadcasting
//!
//! A room is a named topic (`user:<id>` for personal rooms, `channel:<id>` for
//! channels). A user is *present* in a room while at least one subscriber is
//! attached to it.

use crate::core_space::types::{ChannelId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Personal room of a user
    pub fn user(user_id: &UserId) -> Self {
        RoomId(format!("user:{}", user_id))
    }

    pub fn channel(channel_id: &ChannelId) -> Self {
        RoomId(format!("channel:{}", channel_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One event delivered to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room: RoomId,
    pub event: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Broadcaster is closed")]
    Closed,

    #[error("Broadcast failed: {0}")]
    Failed(String),
}

/// Real-time push and presence collaborator
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Emit an event to a room, returning how many subscribers received it
    async fn emit_to_room(&self, room: &RoomId, event: &str, payload: serde_json::Value) -> Result<usize, BroadcastError>;

    /// Whether anyone is currently subscribed to the room
    async fn is_present(&self, room: &RoomId) -> Result<bool, BroadcastError>;
}

/// In-process broadcaster over tokio broadcast channels, one per room.
///
/// Created before the first request is served and closed on shutdown; after
/// [`close`](Self::close) every call fails with [`BroadcastError::Closed`] and
/// existing subscribers see the channel end.
pub struct RoomBroadcaster {
    rooms: RwLock<HashMap<RoomId, broadcast::Sender<RoomEvent>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl RoomBroadcaster {
    /// # Arguments
    /// * `capacity` - Events buffered per room before slow subscribers lag
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to a room, creating it on first use. Creating a room also
    /// drops every room whose subscribers have all gone.
    pub async fn join_room(&self, room: RoomId) -> Result<broadcast::Receiver<RoomEvent>, BroadcastError> {
        if self.is_closed() {
            return Err(BroadcastError::Closed);
        }
        let mut rooms = self.rooms.write().await;
        if !rooms.contains_key(&room) {
            let before = rooms.len();
            rooms.retain(|_, sender| sender.receiver_count() > 0);
            if rooms.len() < before {
                debug!(pruned = before - rooms.len(), "dropped idle rooms");
            }
        }
        let sender = rooms
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        debug!(room = %room, subscribers = sender.receiver_count() + 1, "joined room");
        Ok(sender.subscribe())
    }

    /// Close every room. Subscribers receive `RecvError::Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut rooms = self.rooms.write().await;
        let count = rooms.len();
        rooms.clear();
        debug!(rooms = count, "room broadcaster closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for RoomBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl Broadcaster for RoomBroadcaster {
    async fn emit_to_room(&self, room: &RoomId, event: &str, payload: serde_json::Value) -> Result<usize, BroadcastError> {
        if self.is_closed() {
            return Err(BroadcastError::Closed);
        }
        let rooms = self.rooms.read().await;
        let Some(sender) = rooms.get(room) else {
            return Ok(0);
        };
        let event = RoomEvent {
            room: room.clone(),
            event: event.to_string(),
            payload,
        };
        // A send error only means nobody is listening
        Ok(sender.send(event).unwrap_or(0))
    }

    async fn is_present(&self, room: &RoomId) -> Result<bool, BroadcastError> {
        if self.is_closed() {
            return Err(BroadcastError::Closed);
        }
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room).is_some_and(|s| s.receiver_count() > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_reaches_room_subscribers() {
        let broadcaster = RoomBroadcaster::new(10);
        let room = RoomId::user(&UserId::new("bob"));
        let mut rx = broadcaster.join_room(room.clone()).await.unwrap();

        let count = broadcaster
            .emit_to_room(&room, "notification", json!({"kind": "mention"}))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.room, room);
        assert_eq!(event.event, "notification");
        assert_eq!(event.payload["kind"], "mention");
    }

    #[tokio::test]
    async fn test_emit_to_empty_room_is_not_an_error() {
        let broadcaster = RoomBroadcaster::new(10);
        let room = RoomId::channel(&ChannelId::new("general"));
        assert_eq!(broadcaster.emit_to_room(&room, "new_message", json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_presence_follows_subscribers() {
        let broadcaster = RoomBroadcaster::new(10);
        let room = RoomId::user(&UserId::new("bob"));
        assert!(!broadcaster.is_present(&room).await.unwrap());

        let rx = broadcaster.join_room(room.clone()).await.unwrap();
        assert!(broadcaster.is_present(&room).await.unwrap());

        drop(rx);
        assert!(!broadcaster.is_present(&room).await.unwrap());
    }

    #[tokio::test]
    async fn test_idle_rooms_are_dropped_when_a_room_is_created() {
        let broadcaster = RoomBroadcaster::new(10);
        for n in 0..50 {
            let rx = broadcaster.join_room(RoomId::user(&UserId::new(&format!("u{}", n)))).await.unwrap();
            drop(rx);
        }
        let live = RoomId::channel(&ChannelId::new("general"));
        let _rx = broadcaster.join_room(live.clone()).await.unwrap();
        // Rejoining a live room keeps it
        let _again = broadcaster.join_room(live.clone()).await.unwrap();

        let rooms = broadcaster.rooms.read().await;
        assert_eq!(rooms.len(), 1);
        assert!(rooms.contains_key(&live));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let broadcaster = RoomBroadcaster::new(10);
        let room = RoomId::user(&UserId::new("bob"));
        let mut rx = broadcaster.join_room(room.clone()).await.unwrap();

        broadcaster.close().await;
        assert!(broadcaster.is_closed());
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
        assert!(matches!(
            broadcaster.emit_to_room(&room, "x", json!(null)).await,
            Err(BroadcastError::Closed)
        ));
        assert!(broadcaster.join_room(room).await.is_err());
    }

    #[test]
    fn test_room_names() {
        assert_eq!(RoomId::user(&UserId::new("u1")).as_str(), "user:u1");
        assert_eq!(RoomId::channel(&ChannelId::new("c1")).as_str(), "channel:c1");
    }
}
