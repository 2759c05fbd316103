use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt::Display,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll, Waker},
};

use futures_util::Stream;
use log::warn;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{util::Id, PrimaryKey};

pub type ConnectionId = Id<RoomConnection>;

/// A connection that stops draining its buffer is considered dead once
/// this many messages pile up, and is evicted from all rooms.
const MAX_PENDING_MESSAGES: usize = 512;

/// A logical broadcast channel live connections subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Event(PrimaryKey),
    Playlist(PrimaryKey),
    Device(PrimaryKey),
    User(PrimaryKey),
}

impl Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event:{}", id),
            Self::Playlist(id) => write!(f, "playlist:{}", id),
            Self::Device(id) => write!(f, "device:{}", id),
            Self::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// A notification as delivered to a single subscribed connection
#[derive(Debug, Clone)]
pub struct RoomMessage {
    pub room: Room,
    pub name: &'static str,
    pub payload: Value,
}

/// Fans state-change notifications out to the connections subscribed to a
/// room. Membership is process-local and rebuilt as clients reconnect.
pub struct RoomBroadcaster {
    me: Weak<Self>,
    connections: Mutex<Vec<RoomConnection>>,
    memberships: Mutex<HashMap<Room, HashSet<ConnectionId>>>,
}

pub struct RoomConnection {
    id: ConnectionId,
    pending_messages: Arc<Mutex<VecDeque<RoomMessage>>>,
    waker: Arc<Mutex<Option<Waker>>>,
}

/// A handle to a live connection. Dropping it removes the connection from
/// every room it was subscribed to.
pub struct RoomConnectionHandle {
    id: ConnectionId,
    /// A reference to [RoomConnection]'s pending messages
    pending_messages: Arc<Mutex<VecDeque<RoomMessage>>>,
    /// A reference to [RoomConnection]'s stored [Waker]
    waker: Arc<Mutex<Option<Waker>>>,
    /// Required to remove the connection when dropped
    broadcaster: Weak<RoomBroadcaster>,
}

impl RoomBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            connections: Default::default(),
            memberships: Default::default(),
        })
    }

    /// Registers a new live connection
    pub fn connect(&self) -> RoomConnectionHandle {
        let connection = RoomConnection::new();
        let handle = connection.handle(self.me.clone());

        self.connections.lock().push(connection);
        handle
    }

    /// Adds the connection to a room's membership
    pub fn subscribe(&self, connection_id: ConnectionId, room: Room) {
        self.memberships
            .lock()
            .entry(room)
            .or_default()
            .insert(connection_id);
    }

    /// Removes the connection from a room's membership
    pub fn unsubscribe(&self, connection_id: ConnectionId, room: Room) {
        let mut memberships = self.memberships.lock();

        if let Some(members) = memberships.get_mut(&room) {
            members.remove(&connection_id);

            if members.is_empty() {
                memberships.remove(&room);
            }
        }
    }

    /// Delivers the payload to every connection currently subscribed to
    /// the room. Never blocks and never fails the caller.
    pub fn publish(&self, room: Room, name: &'static str, payload: Value) {
        let members = {
            let memberships = self.memberships.lock();

            match memberships.get(&room) {
                Some(members) => members.clone(),
                None => return,
            }
        };

        let mut dead = Vec::new();

        {
            let connections = self.connections.lock();

            for id in members {
                let Some(connection) = connections.iter().find(|c| c.id == id) else {
                    dead.push(id);
                    continue;
                };

                if !connection.send(RoomMessage {
                    room,
                    name,
                    payload: payload.clone(),
                }) {
                    warn!("Connection {} stopped draining, evicting from rooms", id);
                    dead.push(id);
                }
            }
        }

        for id in dead {
            self.disconnect(id);
        }
    }

    /// Removes the connection from all rooms it was in
    fn disconnect(&self, connection_id: ConnectionId) {
        self.connections.lock().retain(|c| c.id != connection_id);

        let mut memberships = self.memberships.lock();

        for members in memberships.values_mut() {
            members.remove(&connection_id);
        }

        memberships.retain(|_, members| !members.is_empty());
    }
}

impl RoomConnection {
    fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            pending_messages: Default::default(),
            waker: Default::default(),
        }
    }

    /// Queues a message for the receiver, returning false if the
    /// connection is no longer keeping up
    fn send(&self, message: RoomMessage) -> bool {
        let mut pending_messages = self.pending_messages.lock();

        if pending_messages.len() >= MAX_PENDING_MESSAGES {
            return false;
        }

        pending_messages.push_back(message);
        drop(pending_messages);

        if let Some(waker) = self.waker.lock().take() {
            waker.wake()
        }

        true
    }

    fn handle(&self, broadcaster: Weak<RoomBroadcaster>) -> RoomConnectionHandle {
        RoomConnectionHandle {
            id: self.id,
            pending_messages: self.pending_messages.clone(),
            waker: self.waker.clone(),
            broadcaster,
        }
    }
}

impl RoomConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Subscribes this connection to the given room
    pub fn join(&self, room: Room) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.subscribe(self.id, room);
        }
    }

    /// Unsubscribes this connection from the given room
    pub fn leave(&self, room: Room) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id, room);
        }
    }
}

impl Stream for RoomConnectionHandle {
    type Item = RoomMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut pending_messages = self.pending_messages.lock();

        if let Some(message) = pending_messages.pop_front() {
            return Poll::Ready(Some(message));
        }

        *self.waker.lock() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for RoomConnectionHandle {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.disconnect(self.id)
        }
    }
}

#[cfg(test)]
mod test {
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let broadcaster = RoomBroadcaster::new();

        let mut first = broadcaster.connect();
        let mut second = broadcaster.connect();

        first.join(Room::Event(1));
        second.join(Room::Event(1));

        broadcaster.publish(Room::Event(1), "vote-updated", json!({ "trackId": 3 }));

        let message = first.next().await.expect("first receives");
        assert_eq!(message.name, "vote-updated");
        assert_eq!(message.room, Room::Event(1));

        let message = second.next().await.expect("second receives");
        assert_eq!(message.name, "vote-updated");
    }

    #[tokio::test]
    async fn test_publish_skips_other_rooms() {
        let broadcaster = RoomBroadcaster::new();

        let handle = broadcaster.connect();
        handle.join(Room::Event(1));

        broadcaster.publish(Room::Event(2), "vote-updated", json!({}));
        assert!(handle.pending_messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_messages_arrive_in_publish_order() {
        let broadcaster = RoomBroadcaster::new();

        let mut handle = broadcaster.connect();
        handle.join(Room::Playlist(7));

        for index in 0..5 {
            broadcaster.publish(Room::Playlist(7), "playlist-updated", json!(index));
        }

        for index in 0..5 {
            let message = handle.next().await.expect("message arrives");
            assert_eq!(message.payload, json!(index));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = RoomBroadcaster::new();

        let handle = broadcaster.connect();
        handle.join(Room::Device(4));
        handle.leave(Room::Device(4));

        broadcaster.publish(Room::Device(4), "control-revoked", json!({}));
        assert!(handle.pending_messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drop_removes_from_all_rooms() {
        let broadcaster = RoomBroadcaster::new();

        let handle = broadcaster.connect();
        handle.join(Room::Event(1));
        handle.join(Room::Device(2));

        drop(handle);

        assert!(broadcaster.memberships.lock().is_empty());
        assert!(broadcaster.connections.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_connection_is_evicted() {
        let broadcaster = RoomBroadcaster::new();

        let handle = broadcaster.connect();
        handle.join(Room::Event(1));

        for _ in 0..MAX_PENDING_MESSAGES + 1 {
            broadcaster.publish(Room::Event(1), "vote-updated", json!({}));
        }

        assert!(broadcaster.memberships.lock().is_empty());

        // The handle is still alive but no longer receives anything
        broadcaster.publish(Room::Event(1), "vote-updated", json!({}));
        assert_eq!(handle.pending_messages.lock().len(), MAX_PENDING_MESSAGES);
    }
}
