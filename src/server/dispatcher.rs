//! Protocol dispatcher
//!
//! Interprets inbound messages and applies them to the shared context:
//!
//! | type     | effect                              | reply                          |
//! |----------|-------------------------------------|--------------------------------|
//! | `get`    | none                                | `update` with the current value |
//! | `on`     | key added to the watch list         | `update` if a value exists      |
//! | `off`    | key removed from the watch list     | none                            |
//! | `update` | value replaced (last write wins)    | fan-out to every watcher        |
//! | `ping`   | warning logged                      | none                            |
//! | `pong`   | sender marked alive                 | none                            |
//!
//! Fan-out does not exclude the sender: a connection watching the key it
//! updates receives its own update back. Malformed frames are logged and
//! dropped; nothing is sent back to the offending client.

use std::sync::Arc;

use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol::{Key, Message};
use crate::registry::{Connection, ConnectionId, SocketHandle};

use super::context::ServerContext;

/// Applies protocol messages to a [`ServerContext`]
#[derive(Debug, Clone)]
pub struct Dispatcher {
    context: Arc<ServerContext>,
}

impl Dispatcher {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Register a newly accepted socket
    pub async fn connect(&self, socket: SocketHandle) -> ConnectionId {
        let mut state = self.context.lock().await;
        let id = state.registry.register(socket);
        self.context.stats().connection_accepted();

        tracing::info!(
            conn_id = %id,
            connections = state.registry.len(),
            "Connection registered"
        );
        id
    }

    /// Remove a connection whose socket has closed
    ///
    /// Returns false if the connection was already gone (e.g. evicted).
    pub async fn disconnect(&self, id: &ConnectionId) -> bool {
        let mut state = self.context.lock().await;
        let Some(connection) = state.registry.unregister(id) else {
            return false;
        };
        self.context.stats().connection_closed();

        tracing::info!(
            conn_id = %id,
            watched = connection.watch_list().len(),
            connections = state.registry.len(),
            "Connection closed"
        );
        true
    }

    /// Handle one inbound text frame
    ///
    /// Parse and validation failures are contained here so a bad frame
    /// never affects the connection or any other.
    pub async fn handle_frame(&self, id: &ConnectionId, text: &str) {
        match Message::decode(text) {
            Ok(message) => self.handle_message(id, message).await,
            Err(e) => self.reject(id, &e),
        }
    }

    /// Handle one inbound binary frame, which must hold UTF-8 JSON
    pub async fn handle_binary(&self, id: &ConnectionId, data: &[u8]) {
        match std::str::from_utf8(data) {
            Ok(text) => self.handle_frame(id, text).await,
            Err(_) => {
                self.context.stats().malformed_message();
                tracing::warn!(conn_id = %id, len = data.len(), "Dropping non-UTF-8 frame");
            }
        }
    }

    fn reject(&self, id: &ConnectionId, error: &ProtocolError) {
        self.context.stats().malformed_message();
        tracing::warn!(conn_id = %id, error = %error, "Dropping malformed message");
    }

    /// Apply a validated message from a connection
    pub async fn handle_message(&self, id: &ConnectionId, message: Message) {
        let mut state = self.context.lock().await;
        let state = &mut *state;

        if state.registry.find(id).is_none() {
            tracing::debug!(
                conn_id = %id,
                kind = %message.kind(),
                "Ignoring message from unregistered connection"
            );
            return;
        }
        self.context.stats().message_received();

        match message {
            Message::Get { key } => {
                let normalized = key.normalize();
                let data = state.store.get(&normalized).cloned();
                tracing::debug!(conn_id = %id, key = %normalized, found = data.is_some(), "get");

                if let Some(connection) = state.registry.find(id) {
                    self.reply(connection, key, data);
                }
            }
            Message::On { key } => {
                let normalized = key.normalize();
                let added = state.registry.watch(id, &normalized);
                tracing::debug!(conn_id = %id, key = %normalized, added, "on");

                if let Some(data) = state.store.get(&normalized).cloned() {
                    if let Some(connection) = state.registry.find(id) {
                        self.reply(connection, key, Some(data));
                    }
                }
            }
            Message::Off { key } => {
                let normalized = key.normalize();
                let removed = state.registry.unwatch(id, &normalized);
                tracing::debug!(conn_id = %id, key = %normalized, removed, "off");
            }
            Message::Update { key, data } => {
                let normalized = key.normalize();
                let value = data.unwrap_or(Value::Null);
                state.store.set(normalized.clone(), value.clone());
                self.context.stats().update_applied();

                let frame = match Message::update(key, value).encode() {
                    Ok(text) => Arc::<str>::from(text),
                    Err(e) => {
                        tracing::error!(key = %normalized, error = %e, "Failed to encode update");
                        return;
                    }
                };

                let mut delivered = 0u64;
                for connection in state.registry.watching(&normalized) {
                    if connection.send_text(Arc::clone(&frame)) {
                        delivered += 1;
                    }
                }
                self.context.stats().messages_delivered(delivered);

                tracing::debug!(
                    conn_id = %id,
                    key = %normalized,
                    watchers = delivered,
                    "update"
                );
            }
            Message::Ping => {
                tracing::warn!(conn_id = %id, "Unexpected ping from client");
            }
            Message::Pong => {
                state.registry.mark_alive(id);
                tracing::trace!(conn_id = %id, "pong");
            }
        }
    }

    fn reply(&self, connection: &Connection, key: Key, data: Option<Value>) {
        match (Message::Update { key, data }).encode() {
            Ok(text) => {
                if connection.send_text(Arc::from(text)) {
                    self.context.stats().messages_delivered(1);
                }
            }
            Err(e) => {
                tracing::error!(conn_id = %connection.id(), error = %e, "Failed to encode reply");
            }
        }
    }

    /// Current stored value for a key
    pub async fn value(&self, key: &Key) -> Option<Value> {
        self.context.value(key).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::registry::Outbound;

    struct Peer {
        id: ConnectionId,
        rx: UnboundedReceiver<Outbound>,
    }

    impl Peer {
        async fn connect(dispatcher: &Dispatcher) -> Self {
            let (socket, rx) = SocketHandle::channel();
            let id = dispatcher.connect(socket).await;
            Self { id, rx }
        }

        async fn send(&self, dispatcher: &Dispatcher, text: &str) {
            dispatcher.handle_frame(&self.id, text).await;
        }

        fn recv(&mut self) -> Option<Message> {
            match self.rx.try_recv().ok()? {
                Outbound::Text(text) => Some(Message::decode(&text).unwrap()),
                Outbound::Terminate => None,
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(ServerContext::new()))
    }

    fn score_key() -> Key {
        Key::from(["room1", "score"])
    }

    #[tokio::test]
    async fn test_on_is_idempotent() {
        let dispatcher = dispatcher();
        let peer = Peer::connect(&dispatcher).await;

        peer.send(&dispatcher, r#"{"type":"on","key":["room1","score"]}"#).await;
        peer.send(&dispatcher, r#"{"type":"on","key":["room1","score"]}"#).await;

        let state = dispatcher.context().lock().await;
        let conn = state.registry.find(&peer.id).unwrap();
        assert_eq!(conn.watch_list(), &[score_key().normalize()]);
    }

    #[tokio::test]
    async fn test_on_without_value_sends_nothing() {
        let dispatcher = dispatcher();
        let mut peer = Peer::connect(&dispatcher).await;

        peer.send(&dispatcher, r#"{"type":"on","key":["room1","score"]}"#).await;
        assert!(peer.recv().is_none());
    }

    #[tokio::test]
    async fn test_on_replies_with_current_value() {
        let dispatcher = dispatcher();
        let writer = Peer::connect(&dispatcher).await;
        let mut reader = Peer::connect(&dispatcher).await;

        writer
            .send(&dispatcher, r#"{"type":"update","key":["room1","score"],"data":3}"#)
            .await;
        reader.send(&dispatcher, r#"{"type":"on","key":["room1","score"]}"#).await;

        assert_eq!(reader.recv(), Some(Message::update(score_key(), json!(3))));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_watchers_only() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;
        let mut b = Peer::connect(&dispatcher).await;
        let mut c = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"on","key":["room1","score"]}"#).await;
        b.send(&dispatcher, r#"{"type":"on","key":["room1","score"]}"#).await;
        c.send(&dispatcher, r#"{"type":"on","key":["room1","other"]}"#).await;

        c.send(&dispatcher, r#"{"type":"update","key":["room1","score"],"data":{"value":1}}"#)
            .await;

        let expected = Message::update(score_key(), json!({"value": 1}));
        assert_eq!(a.recv(), Some(expected.clone()));
        assert_eq!(b.recv(), Some(expected));
        assert!(c.recv().is_none());
    }

    #[tokio::test]
    async fn test_update_echoes_to_sender() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"on","key":["k"]}"#).await;
        a.send(&dispatcher, r#"{"type":"update","key":["k"],"data":"mine"}"#).await;

        assert_eq!(a.recv(), Some(Message::update(Key::from(["k"]), json!("mine"))));
    }

    #[tokio::test]
    async fn test_off_stops_delivery() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"on","key":["k"]}"#).await;
        a.send(&dispatcher, r#"{"type":"off","key":["k"]}"#).await;
        a.send(&dispatcher, r#"{"type":"off","key":["k"]}"#).await;
        a.send(&dispatcher, r#"{"type":"update","key":["k"],"data":1}"#).await;

        assert!(a.recv().is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"update","key":["k"],"data":"v1"}"#).await;
        a.send(&dispatcher, r#"{"type":"update","key":["k"],"data":"v2"}"#).await;
        assert_eq!(dispatcher.value(&Key::from(["k"])).await, Some(json!("v2")));

        a.send(&dispatcher, r#"{"type":"get","key":["k"]}"#).await;
        assert_eq!(a.recv(), Some(Message::update(Key::from(["k"]), json!("v2"))));

        let mut late = Peer::connect(&dispatcher).await;
        late.send(&dispatcher, r#"{"type":"on","key":["k"]}"#).await;
        assert_eq!(late.recv(), Some(Message::update(Key::from(["k"]), json!("v2"))));
    }

    #[tokio::test]
    async fn test_get_unknown_key_replies_without_data() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"get","key":["nothing"]}"#).await;
        assert_eq!(
            a.recv(),
            Some(Message::Update {
                key: Key::from(["nothing"]),
                data: None
            })
        );
    }

    #[tokio::test]
    async fn test_update_without_data_stores_null() {
        let dispatcher = dispatcher();
        let a = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"update","key":["k"]}"#).await;
        assert_eq!(dispatcher.value(&Key::from(["k"])).await, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, "{not json").await;
        a.send(&dispatcher, r#"{"key":["k"]}"#).await;
        a.send(&dispatcher, r#"{"type":"update","data":1}"#).await;
        a.send(&dispatcher, r#"{"type":"on","key":[]}"#).await;
        dispatcher.handle_binary(&a.id, &[0xff, 0xfe]).await;

        assert!(a.recv().is_none());
        assert_eq!(dispatcher.context().connection_count().await, 1);
        assert!(dispatcher.context().lock().await.store.is_empty());

        let stats = dispatcher.context().stats().snapshot();
        assert_eq!(stats.malformed_messages, 5);
        assert_eq!(stats.messages_received, 0);
    }

    #[tokio::test]
    async fn test_client_ping_is_ignored() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"ping"}"#).await;
        assert!(a.recv().is_none());
        assert_eq!(dispatcher.context().connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_pong_marks_alive() {
        let dispatcher = dispatcher();
        let a = Peer::connect(&dispatcher).await;

        {
            let mut state = dispatcher.context().lock().await;
            state.registry.find_mut(&a.id).unwrap().is_alive = false;
        }
        a.send(&dispatcher, r#"{"type":"pong"}"#).await;

        let state = dispatcher.context().lock().await;
        assert!(state.registry.find(&a.id).unwrap().is_alive());
    }

    #[tokio::test]
    async fn test_disconnect_removes_watcher() {
        let dispatcher = dispatcher();
        let a = Peer::connect(&dispatcher).await;
        let b = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"on","key":["k"]}"#).await;
        assert!(dispatcher.disconnect(&a.id).await);
        assert!(!dispatcher.disconnect(&a.id).await);

        b.send(&dispatcher, r#"{"type":"update","key":["k"],"data":1}"#).await;
        let state = dispatcher.context().lock().await;
        assert_eq!(state.registry.watcher_count("k"), 0);
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_messages_from_unknown_connection_are_ignored() {
        let dispatcher = dispatcher();
        let ghost = ConnectionId::generate();

        dispatcher
            .handle_frame(&ghost, r#"{"type":"update","key":["k"],"data":1}"#)
            .await;
        assert!(dispatcher.value(&Key::from(["k"])).await.is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let dispatcher = dispatcher();
        let mut a = Peer::connect(&dispatcher).await;
        let b = Peer::connect(&dispatcher).await;

        a.send(&dispatcher, r#"{"type":"on","key":["room1","score"]}"#).await;
        b.send(&dispatcher, r#"{"type":"update","key":["room1","score"],"data":{"value":5}}"#)
            .await;
        assert_eq!(
            a.recv(),
            Some(Message::update(score_key(), json!({"value": 5})))
        );

        let mut c = Peer::connect(&dispatcher).await;
        c.send(&dispatcher, r#"{"type":"get","key":["room1","score"]}"#).await;
        assert_eq!(
            c.recv(),
            Some(Message::update(score_key(), json!({"value": 5})))
        );
    }
}
