//! Connection registry
//!
//! Tracks every live connection together with its watch list. A reverse
//! index (normalized key -> connection ids) is kept alongside the
//! per-connection forward list so that fan-out and unsubscribe do not scan
//! every connection.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

/// Opaque, unique connection identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Frame queued for a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded protocol message
    Text(Arc<str>),
    /// Close the socket immediately, without a close handshake
    Terminate,
}

/// Sending half of a connection's socket
///
/// The host that owns the real socket keeps the matching receiver and writes
/// every [`Outbound`] frame to the wire. Dropping the last handle also ends
/// the receiver, which hosts treat like [`Outbound::Terminate`].
#[derive(Debug, Clone)]
pub struct SocketHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SocketHandle {
    /// Create a handle and the receiver its frames arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a text frame. Returns false if the socket is already gone.
    pub fn send_text(&self, text: Arc<str>) -> bool {
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the host to hard-close the socket
    pub fn terminate(&self) {
        let _ = self.tx.send(Outbound::Terminate);
    }

    /// True once the host has dropped the receiving end
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A single client connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    socket: SocketHandle,
    /// Cleared by each liveness sweep, set again by a pong
    pub(crate) is_alive: bool,
    watch: Vec<String>,
    connected_at: Instant,
}

impl Connection {
    fn new(socket: SocketHandle) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            is_alive: true,
            watch: Vec::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn socket(&self) -> &SocketHandle {
        &self.socket
    }

    /// Normalized keys this connection watches, in subscription order
    pub fn watch_list(&self) -> &[String] {
        &self.watch
    }

    /// Whether the connection watches a normalized key
    pub fn watches(&self, key: &str) -> bool {
        self.watch.iter().any(|k| k == key)
    }

    /// Whether a pong arrived since the last liveness sweep
    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    /// Queue an encoded message for this connection
    pub fn send_text(&self, text: Arc<str>) -> bool {
        self.socket.send_text(text)
    }

    /// Time since the connection was registered
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

/// All live connections and their subscriptions
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    watchers: HashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket under a fresh id, alive and watching nothing
    pub fn register(&mut self, socket: SocketHandle) -> ConnectionId {
        let connection = Connection::new(socket);
        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        id
    }

    /// Remove a connection so it receives no further broadcasts
    ///
    /// The socket is told to terminate before the connection is dropped.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(id)?;

        for key in &connection.watch {
            if let Some(ids) = self.watchers.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.watchers.remove(key);
                }
            }
        }

        connection.socket.terminate();
        Some(connection)
    }

    pub fn find(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn find_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Add a normalized key to a connection's watch list
    ///
    /// Returns true if the key was newly added. A repeated watch is a no-op.
    pub fn watch(&mut self, id: &ConnectionId, key: &str) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        if connection.watches(key) {
            return false;
        }

        connection.watch.push(key.to_string());
        self.watchers
            .entry(key.to_string())
            .or_default()
            .insert(id.clone());
        true
    }

    /// Remove a normalized key from a connection's watch list
    ///
    /// Returns true if the key was being watched.
    pub fn unwatch(&mut self, id: &ConnectionId, key: &str) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        let Some(pos) = connection.watch.iter().position(|k| k == key) else {
            return false;
        };

        connection.watch.remove(pos);
        if let Some(ids) = self.watchers.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                self.watchers.remove(key);
            }
        }
        true
    }

    /// Connections currently watching a normalized key
    pub fn watching<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.watchers
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
    }

    /// Number of connections watching a normalized key
    pub fn watcher_count(&self, key: &str) -> usize {
        self.watchers.get(key).map_or(0, HashSet::len)
    }

    /// Mark a connection alive. Returns false for unknown ids.
    pub fn mark_alive(&mut self, id: &ConnectionId) -> bool {
        match self.connections.get_mut(id) {
            Some(connection) => {
                connection.is_alive = true;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
