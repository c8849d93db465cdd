//! Real-time shared-state synchronization over WebSocket
//!
//! A server keeps a flat map from hierarchical keys to JSON values and fans
//! every update out to the connections watching that key. The client
//! runtime lets an application bind to keys, mirror their values locally,
//! and publish changes, queueing them while the socket is down.
//!
//! # Server
//! ```no_run
//! use statesync::{ServerConfig, SyncServer};
//!
//! #[tokio::main]
//! async fn main() -> statesync::Result<()> {
//!     let server = SyncServer::new(ServerConfig::default());
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```
//!
//! # Client
//! ```no_run
//! use serde_json::json;
//! use statesync::{ClientConfig, SyncClient};
//!
//! #[tokio::main]
//! async fn main() -> statesync::Result<()> {
//!     let client = SyncClient::new(ClientConfig::new("ws://localhost:8080/ws"))?;
//!     let mut score = client.runtime().bind_state(["room1", "score"], json!(0))?;
//!     let task = client.spawn();
//!
//!     score.set(json!(5));
//!     println!("score is now {}", score.changed().await?);
//!
//!     task.abort();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use client::{ClientConfig, ClientRuntime, SyncClient};
pub use error::{Error, Result};
pub use protocol::{Key, Message};
pub use server::{ServerConfig, SyncServer};
