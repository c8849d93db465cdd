//! Client runtime
//!
//! Keeps a local mirror of every key the application uses, queues
//! mutations made while no socket is open, and routes server pushes to the
//! bindings registered for each key. The runtime does not own a socket: a
//! transport (see [`SyncClient`](super::SyncClient)) calls [`attach`] when
//! a socket opens, feeds inbound frames to [`handle_frame`], and calls
//! [`detach`] when it closes.
//!
//! On every attach the runtime sends, for each key in use, any queued
//! mutation followed by exactly one `on`. Subscriptions therefore survive
//! reconnects without application involvement.
//!
//! [`attach`]: ClientRuntime::attach
//! [`detach`]: ClientRuntime::detach
//! [`handle_frame`]: ClientRuntime::handle_frame

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::{ClientError, Result};
use crate::protocol::{Key, Message};

use super::binding::{BroadcastBinding, LifecycleBinding, LifecycleHooks, StateBinding};

pub(crate) type Handler = Arc<dyn Fn(&Value) + Send + Sync>;
pub(crate) type Hook = Arc<dyn Fn() + Send + Sync>;

/// Identifies one binding within the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Subscriber {
    State(watch::Sender<Value>),
    Broadcast(Handler),
    Lifecycle {
        on_connect: Option<Hook>,
        on_disconnect: Option<Hook>,
    },
}

struct KeyEntry {
    key: Key,
    cached: Option<Value>,
    pending: Option<Value>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

impl KeyEntry {
    fn new(key: Key) -> Self {
        Self {
            key,
            cached: None,
            pending: None,
            subscribers: Vec::new(),
        }
    }

    fn in_use(&self) -> bool {
        !self.subscribers.is_empty()
    }

    fn connect_hooks(&self) -> impl Iterator<Item = Hook> + '_ {
        self.subscribers.iter().filter_map(|(_, s)| match s {
            Subscriber::Lifecycle { on_connect, .. } => on_connect.clone(),
            _ => None,
        })
    }

    fn disconnect_hooks(&self) -> impl Iterator<Item = Hook> + '_ {
        self.subscribers.iter().filter_map(|(_, s)| match s {
            Subscriber::Lifecycle { on_disconnect, .. } => on_disconnect.clone(),
            _ => None,
        })
    }
}

/// Result of registering a subscriber, taken under one lock
struct Subscribed<T> {
    normalized: String,
    id: SubscriptionId,
    output: T,
    /// Link state at registration time
    connected: bool,
}

#[derive(Default)]
struct RuntimeState {
    entries: HashMap<String, KeyEntry>,
    link: Option<mpsc::UnboundedSender<Message>>,
    next_id: u64,
}

impl RuntimeState {
    /// Send over the open link. Hands the message back if there is none.
    fn send(&mut self, message: Message) -> std::result::Result<(), Message> {
        let Some(link) = &self.link else {
            return Err(message);
        };
        match link.send(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Transport went away without detaching
                self.link = None;
                Err(e.0)
            }
        }
    }
}

/// Client-side state runtime
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone, Default)]
pub struct ClientRuntime {
    inner: Arc<Mutex<RuntimeState>>,
}

impl ClientRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a socket is currently attached
    pub fn is_connected(&self) -> bool {
        self.inner.lock().link.is_some()
    }

    /// Bind local state to a key
    ///
    /// The binding's value starts as the cached server value if one is
    /// known, otherwise `initial`.
    pub fn bind_state(&self, key: impl Into<Key>, initial: Value) -> Result<StateBinding> {
        let key = key.into();

        let sub = self.subscribe(&key, |entry| {
            let start = entry.cached.clone().unwrap_or_else(|| initial.clone());
            let (tx, rx) = watch::channel(start);
            (Subscriber::State(tx), rx)
        })?;

        Ok(StateBinding::new(
            self.clone(),
            key,
            sub.normalized,
            sub.id,
            initial,
            sub.output,
        ))
    }

    /// Register a handler invoked for every update to a key
    ///
    /// Updates this client originated are delivered too, since the server
    /// echoes updates to every watcher including the sender.
    pub fn bind_broadcast<F>(&self, key: impl Into<Key>, handler: F) -> Result<BroadcastBinding>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = key.into();
        let handler: Handler = Arc::new(handler);
        let sub = self.subscribe(&key, |_| (Subscriber::Broadcast(handler), ()))?;

        Ok(BroadcastBinding::new(self.clone(), key, sub.normalized, sub.id))
    }

    /// Register connect/disconnect hooks for a key
    ///
    /// `on_connect` fires once the key's subscription has been sent on a
    /// newly opened socket, or immediately if the socket is already open.
    pub fn bind_lifecycle(
        &self,
        key: impl Into<Key>,
        hooks: LifecycleHooks,
    ) -> Result<LifecycleBinding> {
        let key = key.into();
        let LifecycleHooks {
            on_connect,
            on_disconnect,
        } = hooks;
        let immediate = on_connect.clone();

        let sub = self.subscribe(&key, |_| {
            let subscriber = Subscriber::Lifecycle {
                on_connect,
                on_disconnect,
            };
            (subscriber, ())
        })?;

        // A later attach fires the hook itself
        if sub.connected {
            if let Some(hook) = immediate {
                hook();
            }
        }

        Ok(LifecycleBinding::new(self.clone(), sub.normalized, sub.id))
    }

    fn subscribe<F, T>(&self, key: &Key, make: F) -> Result<Subscribed<T>>
    where
        F: FnOnce(&KeyEntry) -> (Subscriber, T),
    {
        if key.is_empty() {
            return Err(ClientError::EmptyKey.into());
        }

        let normalized = key.normalize();
        let mut state = self.inner.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;

        let entry = state
            .entries
            .entry(normalized.clone())
            .or_insert_with(|| KeyEntry::new(key.clone()));
        let first = !entry.in_use();
        let (subscriber, output) = make(entry);
        entry.subscribers.push((id, subscriber));

        if first {
            tracing::debug!(key = %normalized, "Subscribing");
            // Not connected: the `on` goes out on the next attach instead
            let _ = state.send(Message::On { key: key.clone() });
        }

        Ok(Subscribed {
            normalized,
            id,
            output,
            connected: state.link.is_some(),
        })
    }

    /// Remove one binding. The last binding for a key sends `off`.
    pub(crate) fn unsubscribe(&self, normalized: &str, id: SubscriptionId) {
        let mut state = self.inner.lock();
        let Some(entry) = state.entries.get_mut(normalized) else {
            return;
        };

        entry.subscribers.retain(|(sid, _)| *sid != id);
        if entry.in_use() {
            return;
        }

        let key = entry.key.clone();
        if entry.pending.is_none() {
            state.entries.remove(normalized);
        }

        tracing::debug!(key = %normalized, "Unsubscribing");
        let _ = state.send(Message::Off { key });
    }

    /// Set a key to a literal value
    pub fn set(&self, key: &Key, value: Value) {
        self.update_with(key, &Value::Null, move |_| value);
    }

    /// Set a key from its current value
    ///
    /// `f` receives the queued value if a mutation is pending, else the
    /// cached server value, else `initial`. It runs with the runtime locked
    /// and must not call back into the runtime.
    pub fn update_with<F>(&self, key: &Key, initial: &Value, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        if key.is_empty() {
            tracing::warn!("Ignoring mutation of empty key");
            return;
        }

        let normalized = key.normalize();
        let mut state = self.inner.lock();

        let entry = state
            .entries
            .entry(normalized.clone())
            .or_insert_with(|| KeyEntry::new(key.clone()));
        let current = entry
            .pending
            .as_ref()
            .or(entry.cached.as_ref())
            .unwrap_or(initial);
        let next = f(current);

        match state.send(Message::update(key.clone(), next)) {
            Ok(()) => {
                let unused = state
                    .entries
                    .get(&normalized)
                    .is_some_and(|e| !e.in_use() && e.pending.is_none());
                if unused {
                    state.entries.remove(&normalized);
                }
                tracing::trace!(key = %normalized, "Update sent");
            }
            Err(Message::Update { data, .. }) => {
                if let Some(entry) = state.entries.get_mut(&normalized) {
                    entry.pending = data;
                }
                tracing::debug!(key = %normalized, "Update queued until connected");
            }
            Err(_) => {}
        }
    }

    /// Ask the server for a key's current value
    ///
    /// The reply arrives as an ordinary update for the key's bindings.
    pub fn get(&self, key: &Key) -> Result<()> {
        if key.is_empty() {
            return Err(ClientError::EmptyKey.into());
        }
        self.inner
            .lock()
            .send(Message::Get { key: key.clone() })
            .map_err(|_| ClientError::NotConnected.into())
    }

    /// Last value received from the server for a key
    pub fn cached(&self, key: &Key) -> Option<Value> {
        self.inner
            .lock()
            .entries
            .get(&key.normalize())
            .and_then(|e| e.cached.clone())
    }

    /// Mutation queued for a key while disconnected
    pub fn pending(&self, key: &Key) -> Option<Value> {
        self.inner
            .lock()
            .entries
            .get(&key.normalize())
            .and_then(|e| e.pending.clone())
    }

    /// Attach an open socket
    ///
    /// Flushes queued mutations and subscribes every key in use, then
    /// fires `on_connect` hooks.
    pub fn attach(&self, link: mpsc::UnboundedSender<Message>) {
        let hooks: Vec<Hook> = {
            let mut state = self.inner.lock();
            let state = &mut *state;

            let mut outgoing = Vec::new();
            for entry in state.entries.values_mut() {
                if let Some(data) = entry.pending.take() {
                    outgoing.push(Message::update(entry.key.clone(), data));
                }
                if entry.in_use() {
                    outgoing.push(Message::On {
                        key: entry.key.clone(),
                    });
                }
            }
            state.entries.retain(|_, e| e.in_use());

            tracing::info!(
                keys = state.entries.len(),
                messages = outgoing.len(),
                "Socket attached"
            );
            for message in outgoing {
                if link.send(message).is_err() {
                    break;
                }
            }
            state.link = Some(link);

            let hooks = state.entries.values().flat_map(KeyEntry::connect_hooks).collect();
            hooks
        };

        for hook in hooks {
            hook();
        }
    }

    /// Detach the socket after it closed and fire `on_disconnect` hooks
    ///
    /// Cached values are kept; mutations made from now on are queued.
    pub fn detach(&self) {
        let hooks: Vec<Hook> = {
            let mut state = self.inner.lock();
            if state.link.take().is_none() {
                return;
            }
            tracing::info!("Socket detached");
            let hooks = state
                .entries
                .values()
                .flat_map(KeyEntry::disconnect_hooks)
                .collect();
            hooks
        };

        for hook in hooks {
            hook();
        }
    }

    /// Handle one inbound text frame
    pub fn handle_frame(&self, text: &str) {
        match Message::decode(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed message from server"),
        }
    }

    /// Apply a message pushed by the server
    pub fn handle_message(&self, message: Message) {
        match message {
            Message::Update { key, data } => self.dispatch_update(&key, data),
            Message::Ping => {
                let _ = self.inner.lock().send(Message::Pong);
            }
            other => {
                tracing::debug!(kind = %other.kind(), "Ignoring unexpected message from server");
            }
        }
    }

    fn dispatch_update(&self, key: &Key, data: Option<Value>) {
        let normalized = key.normalize();
        let Some(value) = data else {
            tracing::debug!(key = %normalized, "Server has no value for key");
            return;
        };

        let handlers: Vec<Handler> = {
            let mut state = self.inner.lock();
            let Some(entry) = state.entries.get_mut(&normalized) else {
                tracing::debug!(key = %normalized, "Update for key not in use");
                return;
            };
            entry.cached = Some(value.clone());

            let mut handlers = Vec::new();
            for (_, subscriber) in &entry.subscribers {
                match subscriber {
                    Subscriber::State(tx) => {
                        tx.send_replace(value.clone());
                    }
                    Subscriber::Broadcast(handler) => handlers.push(Arc::clone(handler)),
                    Subscriber::Lifecycle { .. } => {}
                }
            }
            handlers
        };

        for handler in handlers {
            handler(&value);
        }
    }
}

impl std::fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ClientRuntime")
            .field("connected", &state.link.is_some())
            .field("keys", &state.entries.len())
            .finish()
    }
}
