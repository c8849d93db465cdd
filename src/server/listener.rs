//! Sync server listener
//!
//! Handles the TCP accept loop, the WebSocket upgrade on the configured
//! path, and spawns a task per connection. The liveness monitor runs for as
//! long as the server does.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::connection;
use crate::server::context::ServerContext;
use crate::server::dispatcher::Dispatcher;
use crate::server::liveness::LivenessMonitor;

/// Shared-state sync server
pub struct SyncServer {
    config: ServerConfig,
    dispatcher: Dispatcher,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl SyncServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self::with_context(config, Arc::new(ServerContext::new()))
    }

    /// Create a server around an existing context
    pub fn with_context(config: ServerConfig, context: Arc<ServerContext>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            dispatcher: Dispatcher::new(context),
            connection_semaphore,
        }
    }

    /// Get the shared server context
    pub fn context(&self) -> &Arc<ServerContext> {
        self.dispatcher.context()
    }

    /// Get the protocol dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener (useful for binding port 0)
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` completes
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, path = %self.config.path, "Sync server listening");

        let liveness = LivenessMonitor::new(
            Arc::clone(self.dispatcher.context()),
            self.config.ping_interval,
        )
        .spawn();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        // Stop liveness task on shutdown
        liveness.abort();

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        tracing::debug!(peer = %peer_addr, "New TCP connection");

        let dispatcher = self.dispatcher.clone();
        let path = self.config.path.clone();

        tokio::spawn(async move {
            let _permit = permit;

            match connection::upgrade(socket, &path).await {
                Ok(ws) => connection::serve(ws, peer_addr, dispatcher).await,
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "WebSocket upgrade failed");
                }
            }
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;
    use crate::protocol::{Key, Message};

    async fn start() -> (Arc<SyncServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(SyncServer::new(ServerConfig::with_addr(addr)));

        let running = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = running.serve(listener).await;
        });
        (server, addr)
    }

    async fn next_message<S>(stream: &mut S) -> Message
    where
        S: StreamExt<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            match stream.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return Message::decode(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_broadcast() {
        let (server, addr) = start().await;
        let url = format!("ws://{}/ws", addr);

        let (mut a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        let on = Message::On {
            key: Key::from(["room1", "score"]),
        };
        a.send(WsMessage::Text(on.encode().unwrap())).await.unwrap();

        // Wait until the subscription is registered before publishing
        while server.context().watcher_count(&on.key().cloned().unwrap()).await == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let update = Message::update(Key::from(["room1", "score"]), json!({"value": 5}));
        b.send(WsMessage::Text(update.encode().unwrap())).await.unwrap();

        assert_eq!(next_message(&mut a).await, update);
    }

    #[tokio::test]
    async fn test_unknown_path_refused() {
        let (_server, addr) = start().await;
        let url = format!("ws://{}/elsewhere", addr);

        assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_unregisters() {
        let (server, addr) = start().await;
        let url = format!("ws://{}/ws", addr);

        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        while server.context().connection_count().await == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        ws.close(None).await.unwrap();
        while server.context().connection_count().await != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(server.context().stats().snapshot().connections_closed, 1);
    }
}
