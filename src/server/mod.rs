//! Sync server
//!
//! [`ServerContext`] owns the state store and connection registry.
//! [`Dispatcher`] applies protocol messages to it, [`LivenessMonitor`]
//! evicts unresponsive connections, and [`SyncServer`] hosts both behind a
//! WebSocket upgrade endpoint.

pub mod config;
pub(crate) mod connection;
pub mod context;
pub mod dispatcher;
pub mod listener;
pub mod liveness;

pub use config::ServerConfig;
pub use context::ServerContext;
pub use dispatcher::Dispatcher;
pub use listener::SyncServer;
pub use liveness::{LivenessMonitor, SweepReport};
