//! Application-facing bindings
//!
//! Each binding holds one subscription in the [`ClientRuntime`] and
//! releases it on drop. Dropping a binding only affects that binding;
//! other bindings on the same key keep receiving updates.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::error::{ClientError, Result};
use crate::protocol::Key;

use super::runtime::{ClientRuntime, Hook, SubscriptionId};

/// Local mirror of one key plus a setter
///
/// The mirror changes when the server pushes an update for the key,
/// including the echo of this client's own mutations.
pub struct StateBinding {
    runtime: ClientRuntime,
    key: Key,
    normalized: String,
    id: SubscriptionId,
    initial: Value,
    rx: watch::Receiver<Value>,
}

impl StateBinding {
    pub(crate) fn new(
        runtime: ClientRuntime,
        key: Key,
        normalized: String,
        id: SubscriptionId,
        initial: Value,
        rx: watch::Receiver<Value>,
    ) -> Self {
        Self {
            runtime,
            key,
            normalized,
            id,
            initial,
            rx,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Current value of the local mirror
    pub fn value(&self) -> Value {
        self.rx.borrow().clone()
    }

    /// Set the key to a literal value
    ///
    /// Sent immediately if connected, otherwise queued. Only the last value
    /// queued before the socket opens is sent.
    pub fn set(&self, value: Value) {
        self.runtime.set(&self.key, value);
    }

    /// Set the key from its current value
    ///
    /// `f` receives the queued value if one is pending, else the last
    /// server value, else this binding's initial value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        self.runtime.update_with(&self.key, &self.initial, f);
    }

    /// Wait for the next change to the mirror and return the new value
    pub async fn changed(&mut self) -> Result<Value> {
        self.rx
            .changed()
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

impl Drop for StateBinding {
    fn drop(&mut self) {
        self.runtime.unsubscribe(&self.normalized, self.id);
    }
}

impl fmt::Debug for StateBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateBinding")
            .field("key", &self.key)
            .field("value", &*self.rx.borrow())
            .finish()
    }
}

/// Handler registration for every update on a key, plus a sender
pub struct BroadcastBinding {
    runtime: ClientRuntime,
    key: Key,
    normalized: String,
    id: SubscriptionId,
}

impl BroadcastBinding {
    pub(crate) fn new(
        runtime: ClientRuntime,
        key: Key,
        normalized: String,
        id: SubscriptionId,
    ) -> Self {
        Self {
            runtime,
            key,
            normalized,
            id,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Publish a value to every watcher of the key, this client included
    ///
    /// Callers that need to tell their own messages apart should embed a
    /// sender identifier in `data`.
    pub fn broadcast(&self, data: Value) {
        self.runtime.set(&self.key, data);
    }
}

impl Drop for BroadcastBinding {
    fn drop(&mut self) {
        self.runtime.unsubscribe(&self.normalized, self.id);
    }
}

impl fmt::Debug for BroadcastBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastBinding")
            .field("key", &self.key)
            .finish()
    }
}

/// Connect/disconnect callbacks
#[derive(Default)]
pub struct LifecycleHooks {
    pub(crate) on_connect: Option<Hook>,
    pub(crate) on_disconnect: Option<Hook>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a socket opens and the key's subscription has been sent
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called when the socket closes
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

/// Registered lifecycle hooks; unregistered on drop
pub struct LifecycleBinding {
    runtime: ClientRuntime,
    normalized: String,
    id: SubscriptionId,
}

impl LifecycleBinding {
    pub(crate) fn new(runtime: ClientRuntime, normalized: String, id: SubscriptionId) -> Self {
        Self {
            runtime,
            normalized,
            id,
        }
    }
}

impl Drop for LifecycleBinding {
    fn drop(&mut self) {
        self.runtime.unsubscribe(&self.normalized, self.id);
    }
}

impl fmt::Debug for LifecycleBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleBinding")
            .field("key", &self.normalized)
            .finish()
    }
}
