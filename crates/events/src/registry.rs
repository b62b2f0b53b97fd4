//! Live connection registry.
//!
//! [`ConnectionRegistry`] tracks every open duplex connection, keyed by the
//! user it belongs to, plus named channel subscriptions. It is constructed
//! once by the composition root and shared as `Arc<ConnectionRegistry>`.
//!
//! Each connection is a bounded outbound queue drained by the transport task
//! that owns the socket. Writes are non-blocking `try_send`s; a full or
//! closed queue marks the connection dead and it is pruned on the spot, so a
//! slow client never stalls delivery to anyone else.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use herald_core::channels::validate_channel_name;
use herald_core::error::CoreError;
use herald_core::types::{DbId, Timestamp};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Frames and connections
// ---------------------------------------------------------------------------

/// A frame queued for a connection's transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A serialized JSON message, shared between all recipients.
    Text(Arc<str>),
    Ping,
    Close,
}

/// Process-unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The registry's handle on one live connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Frame>,
    connected_at: Timestamp,
}

impl Connection {
    /// Create a connection with an outbound queue of `buffer` frames.
    ///
    /// The returned receiver must be drained by whoever owns the socket.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let conn = Self {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            sender,
            connected_at: chrono::Utc::now(),
        };
        (conn, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    fn try_send(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.sender.try_send(frame)
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Tracks live connections per user and channel subscriptions per channel.
///
/// Both maps are sharded (`DashMap`), so connect/disconnect storms for one
/// user do not serialize delivery to unrelated users. No method holds a shard
/// guard while touching another shard.
pub struct ConnectionRegistry {
    users: DashMap<DbId, HashMap<ConnectionId, Connection>>,
    subscriptions: DashMap<String, HashSet<DbId>>,
    outbound_buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            users: DashMap::new(),
            subscriptions: DashMap::new(),
            outbound_buffer,
        }
    }

    /// Register `connection` under `user_id`.
    pub fn connect(&self, user_id: DbId, connection: Connection) -> ConnectionId {
        let id = connection.id();
        self.users.entry(user_id).or_default().insert(id, connection);
        tracing::debug!(user_id, connection_id = %id, "Connection registered");
        id
    }

    /// Create a connection with the registry's buffer size and register it.
    pub fn open(&self, user_id: DbId) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (conn, rx) = Connection::new(self.outbound_buffer);
        (self.connect(user_id, conn), rx)
    }

    /// Remove a connection. Removing an unknown connection is a no-op.
    ///
    /// Returns whether the connection was registered.
    pub fn disconnect(&self, user_id: DbId, connection_id: ConnectionId) -> bool {
        let removed = match self.users.get_mut(&user_id) {
            Some(mut conns) => conns.remove(&connection_id).is_some(),
            None => false,
        };
        self.users.remove_if(&user_id, |_, conns| conns.is_empty());
        if removed {
            tracing::debug!(user_id, connection_id = %connection_id, "Connection removed");
        }
        removed
    }

    /// Serialize `message` once and queue it on every connection of the user.
    ///
    /// Returns `false` when the user has no connections or when every write
    /// failed (those connections are pruned).
    pub fn send_to_user(&self, user_id: DbId, message: &serde_json::Value) -> bool {
        match serialize(message) {
            Some(text) => self.deliver(user_id, Frame::Text(text)),
            None => false,
        }
    }

    /// Deliver to every connected user. Returns the number of users reached.
    pub fn broadcast_to_all(&self, message: &serde_json::Value) -> usize {
        let Some(text) = serialize(message) else {
            return 0;
        };
        let frame = Frame::Text(text);
        self.connected_user_ids()
            .into_iter()
            .filter(|user_id| self.deliver(*user_id, frame.clone()))
            .count()
    }

    /// Subscribe a user to a named channel. Works whether or not the user is
    /// connected.
    pub fn subscribe(&self, user_id: DbId, channel: &str) -> Result<(), CoreError> {
        validate_channel_name(channel)?;
        self.subscriptions
            .entry(channel.to_string())
            .or_default()
            .insert(user_id);
        Ok(())
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, user_id: DbId, channel: &str) -> bool {
        let removed = match self.subscriptions.get_mut(channel) {
            Some(mut subscribers) => subscribers.remove(&user_id),
            None => false,
        };
        self.subscriptions
            .remove_if(channel, |_, subscribers| subscribers.is_empty());
        removed
    }

    /// Deliver to connected subscribers of `channel`. Returns the number of
    /// users reached.
    pub fn broadcast_to_channel(&self, channel: &str, message: &serde_json::Value) -> usize {
        let subscribers: Vec<DbId> = match self.subscriptions.get(channel) {
            Some(set) => set.iter().copied().collect(),
            None => return 0,
        };
        let Some(text) = serialize(message) else {
            return 0;
        };
        let frame = Frame::Text(text);
        subscribers
            .into_iter()
            .filter(|user_id| self.deliver(*user_id, frame.clone()))
            .count()
    }

    /// Channels `user_id` is subscribed to, sorted.
    pub fn subscriptions_of(&self, user_id: DbId) -> Vec<String> {
        let mut channels: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().contains(&user_id))
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort();
        channels
    }

    pub fn is_user_connected(&self, user_id: DbId) -> bool {
        self.users.get(&user_id).is_some_and(|conns| !conns.is_empty())
    }

    /// Total number of registered connections across all users.
    pub fn active_connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn active_users(&self) -> HashSet<DbId> {
        self.connected_user_ids().into_iter().collect()
    }

    /// Queue a ping on every connection, pruning dead ones.
    pub fn ping_all(&self) {
        for user_id in self.connected_user_ids() {
            self.deliver(user_id, Frame::Ping);
        }
    }

    /// Queue a close frame on every connection, then forget them all.
    ///
    /// Returns the number of connections closed.
    pub fn shutdown_all(&self) -> usize {
        let mut count = 0;
        for user_id in self.connected_user_ids() {
            if let Some((_, conns)) = self.users.remove(&user_id) {
                for conn in conns.values() {
                    let _ = conn.try_send(Frame::Close);
                }
                count += conns.len();
            }
        }
        tracing::info!(count, "Closed all live connections");
        count
    }

    fn connected_user_ids(&self) -> Vec<DbId> {
        self.users.iter().map(|entry| *entry.key()).collect()
    }

    /// Write `frame` to every connection of the user, pruning the ones that
    /// cannot take it. Returns whether at least one write succeeded.
    fn deliver(&self, user_id: DbId, frame: Frame) -> bool {
        let mut delivered = false;
        let mut now_empty = false;
        if let Some(mut conns) = self.users.get_mut(&user_id) {
            conns.retain(|id, conn| match conn.try_send(frame.clone()) {
                Ok(()) => {
                    delivered = true;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(user_id, connection_id = %id, "Outbound queue full, dropping connection");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(user_id, connection_id = %id, "Connection closed, pruning");
                    false
                }
            });
            now_empty = conns.is_empty();
        }
        if now_empty {
            self.users.remove_if(&user_id, |_, conns| conns.is_empty());
        }
        delivered
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_BUFFER)
    }
}

fn serialize(message: &serde_json::Value) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize live message");
            None
        }
    }
}
