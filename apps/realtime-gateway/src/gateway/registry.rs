//! Registry of live connections, their outbound queues, and room membership.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use feedback_common::{ConnectionId, Room};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::ServerMessage;

/// Frames a connection may have queued before further frames to it are
/// dropped. A client that stops reading cannot grow the queue past this.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Sending half of a connection's outbound frame queue.
pub type Outbound = mpsc::Sender<Arc<ServerMessage>>;

/// Create the outbound queue for a new connection.
pub fn outbound_channel() -> (Outbound, mpsc::Receiver<Arc<ServerMessage>>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

struct ConnectionEntry {
    sender: Outbound,
    rooms: HashSet<Room>,
}

/// Shared registry of every connection in this process.
///
/// Room membership is stored twice: per connection (for disconnect
/// bookkeeping) and per room (for fan-out). Both sides are updated by the
/// same call and no call holds a guard on one map while touching the other.
/// A room exists only while it has at least one member.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Mutex<ConnectionEntry>>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Track a newly opened connection.
    pub fn register(&self, id: ConnectionId, sender: Outbound) {
        let entry = ConnectionEntry {
            sender,
            rooms: HashSet::new(),
        };
        self.connections.insert(id, Mutex::new(entry));
    }

    /// Forget a connection and drop it from every room.
    /// Returns the rooms it belonged to.
    pub fn unregister(&self, id: &ConnectionId) -> Vec<Room> {
        let Some((_, entry)) = self.connections.remove(id) else {
            return Vec::new();
        };
        let mut rooms: Vec<Room> = entry.into_inner().rooms.into_iter().collect();
        rooms.sort();

        for room in &rooms {
            self.remove_from_room(room, id);
        }
        rooms
    }

    /// Add a connection to a room. Returns `false` if the connection is
    /// unknown or was already a member.
    pub fn join(&self, id: &ConnectionId, room: Room) -> bool {
        let inserted = match self.connections.get(id) {
            Some(entry) => entry.lock().rooms.insert(room.clone()),
            None => return false,
        };
        if inserted {
            self.rooms.entry(room).or_default().insert(id.clone());
        }
        inserted
    }

    /// Remove a connection from a room. Returns `false` if it was not a member.
    pub fn leave(&self, id: &ConnectionId, room: &Room) -> bool {
        let removed = match self.connections.get(id) {
            Some(entry) => entry.lock().rooms.remove(room),
            None => false,
        };
        self.remove_from_room(room, id);
        removed
    }

    fn remove_from_room(&self, room: &Room, id: &ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    pub fn is_member(&self, id: &ConnectionId, room: &Room) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(id))
            .unwrap_or(false)
    }

    /// Rooms a connection currently belongs to, sorted.
    pub fn rooms_of(&self, id: &ConnectionId) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .connections
            .get(id)
            .map(|entry| entry.lock().rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn members(&self, room: &Room) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room: &Room) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue a frame for one connection. Frames for closed or unknown
    /// connections are dropped silently; frames for a connection whose
    /// queue is full are dropped with a warning.
    pub fn emit(&self, id: &ConnectionId, message: ServerMessage) -> bool {
        self.emit_shared(id, Arc::new(message))
    }

    fn emit_shared(&self, id: &ConnectionId, message: Arc<ServerMessage>) -> bool {
        let sender = match self.connections.get(id) {
            Some(entry) => entry.lock().sender.clone(),
            None => return false,
        };
        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    connection_id = %id,
                    event = %dropped.event,
                    "connection lagging behind, dropping frame"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a frame for every member of `room` except `except`.
    /// Returns the number of connections it was queued for.
    pub fn broadcast(
        &self,
        room: &Room,
        message: ServerMessage,
        except: Option<&ConnectionId>,
    ) -> usize {
        let message = Arc::new(message);
        self.members(room)
            .iter()
            .filter(|member| Some(*member) != except)
            .filter(|member| self.emit_shared(member, message.clone()))
            .count()
    }
}
