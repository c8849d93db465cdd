//! Shared server context
//!
//! The store and the connection registry live behind one mutex so that a
//! store write, a watch-list change and the resulting fan-out happen as a
//! single step with respect to every other connection's messages. Socket
//! writes only enqueue onto per-connection channels and never block while
//! the lock is held.

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::protocol::Key;
use crate::registry::{ConnectionRegistry, StateStore};
use crate::stats::ServerStats;

/// Everything guarded by the context lock. Only the dispatcher and the
/// liveness monitor write through it.
#[derive(Debug, Default)]
pub(crate) struct SyncState {
    pub(crate) store: StateStore,
    pub(crate) registry: ConnectionRegistry,
}

/// Server-wide state, created once at startup and shared by reference
#[derive(Debug, Default)]
pub struct ServerContext {
    state: Mutex<SyncState>,
    stats: ServerStats,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive access to the store and registry
    pub(crate) async fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().await
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// Stored value for a key
    pub async fn value(&self, key: &Key) -> Option<Value> {
        self.state.lock().await.store.get(&key.normalize()).cloned()
    }

    /// Number of stored keys
    pub async fn key_count(&self) -> usize {
        self.state.lock().await.store.len()
    }

    /// Number of connections watching a key
    pub async fn watcher_count(&self, key: &Key) -> usize {
        self.state
            .lock()
            .await
            .registry
            .watcher_count(&key.normalize())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::registry::SocketHandle;
    use crate::server::Dispatcher;

    #[tokio::test]
    async fn test_read_accessors_reflect_dispatched_messages() {
        let context = Arc::new(ServerContext::new());
        let dispatcher = Dispatcher::new(Arc::clone(&context));
        let key = Key::from(["room1", "score"]);

        let (socket, _rx) = SocketHandle::channel();
        let id = dispatcher.connect(socket).await;
        assert_eq!(context.connection_count().await, 1);
        assert_eq!(context.key_count().await, 0);
        assert!(context.value(&key).await.is_none());

        dispatcher
            .handle_frame(&id, r#"{"type":"on","key":["room1","score"]}"#)
            .await;
        dispatcher
            .handle_frame(&id, r#"{"type":"update","key":["room1","score"],"data":3}"#)
            .await;

        assert_eq!(context.watcher_count(&key).await, 1);
        assert_eq!(context.key_count().await, 1);
        assert_eq!(context.value(&key).await, Some(json!(3)));
    }
}
