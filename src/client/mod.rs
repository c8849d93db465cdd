//! Client runtime
//!
//! ```text
//!   application
//!       │ bind_state / bind_broadcast / bind_lifecycle
//!       ▼
//!  ┌──────────────┐  Message   ┌─────────────┐  WebSocket  ┌────────┐
//!  │ ClientRuntime│ ─────────► │  SyncClient │ ──────────► │ server │
//!  │  per-key     │ ◄───────── │  (connector)│ ◄────────── │        │
//!  │  entries     │   frames   └─────────────┘             └────────┘
//!  └──────────────┘
//! ```
//!
//! The runtime tracks which keys are in use, the last server value per key
//! and any mutation queued while the socket is closed. The connector owns
//! the socket and reconnects it; on every (re)connect the runtime flushes
//! queued mutations and re-subscribes.

pub mod binding;
pub mod config;
pub mod connector;
pub mod runtime;

pub use binding::{BroadcastBinding, LifecycleBinding, LifecycleHooks, StateBinding};
pub use config::ClientConfig;
pub use connector::SyncClient;
pub use runtime::{ClientRuntime, SubscriptionId};
