//! Server-side state: the value store and the connection registry
//!
//! # Architecture
//!
//! ```text
//!                       ServerContext (one Mutex)
//!                 ┌──────────────────────────────────┐
//!                 │ store:    HashMap<key, Value>    │
//!                 │ registry: HashMap<id, Connection>│
//!                 │           HashMap<key, {id..}>   │
//!                 └────────────────┬─────────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         ▼                        ▼                        ▼
//!   [Connection A]           [Connection B]           [Connection C]
//!   watch: [k1]              watch: [k1, k2]          watch: []
//!         │                        │
//!         └──◄── update{k1} fan-out ──►┘
//! ```
//!
//! Both structures are plain data. Atomicity comes from the caller holding
//! a single lock across store mutation, watch-list mutation and fan-out.

pub mod connection;
pub mod store;

pub use connection::{Connection, ConnectionId, ConnectionRegistry, Outbound, SocketHandle};
pub use store::StateStore;
