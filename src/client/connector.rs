//! WebSocket transport for the client runtime
//!
//! Opens the socket, attaches it to the [`ClientRuntime`], pumps frames in
//! both directions, and reconnects with exponential backoff after the
//! socket closes.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::Result;
use crate::protocol::Message;

use super::config::ClientConfig;
use super::runtime::ClientRuntime;

/// Sync client: a [`ClientRuntime`] driven over a WebSocket
///
/// # Example
/// ```no_run
/// use serde_json::json;
/// use statesync::client::{ClientConfig, SyncClient};
///
/// # async fn example() -> statesync::error::Result<()> {
/// let client = SyncClient::new(ClientConfig::new("ws://localhost:8080/ws"))?;
/// let runtime = client.runtime().clone();
///
/// let score = runtime.bind_state(["room1", "score"], json!(0))?;
/// score.update(|v| json!(v.as_i64().unwrap_or(0) + 1));
///
/// tokio::spawn(async move { client.run().await });
/// # Ok(())
/// # }
/// ```
pub struct SyncClient {
    config: ClientConfig,
    runtime: ClientRuntime,
}

impl SyncClient {
    /// Create a client with a fresh runtime
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_runtime(config, ClientRuntime::new())
    }

    /// Create a client driving an existing runtime
    pub fn with_runtime(config: ClientConfig, runtime: ClientRuntime) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, runtime })
    }

    pub fn runtime(&self) -> &ClientRuntime {
        &self.runtime
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect and keep the runtime attached
    ///
    /// With reconnect enabled this only returns if the task is dropped.
    /// Without it, a failed connect is returned as an error and a closed
    /// socket ends the loop with `Ok`.
    pub async fn run(&self) -> Result<()> {
        let mut delay = self.config.reconnect_delay;

        loop {
            match tokio_tungstenite::connect_async(self.config.url.as_str()).await {
                Ok((ws, _)) => {
                    tracing::info!(url = %self.config.url, "Connected");
                    delay = self.config.reconnect_delay;
                    self.session(ws).await;
                    tracing::info!(url = %self.config.url, "Disconnected");
                }
                Err(e) if !self.config.reconnect => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(
                        url = %self.config.url,
                        error = %e,
                        retry_ms = delay.as_millis() as u64,
                        "Connect failed"
                    );
                }
            }

            if !self.config.reconnect {
                return Ok(());
            }
            tokio::time::sleep(delay).await;
            delay = self.config.next_delay(delay);
        }
    }

    /// Spawn [`run`](Self::run) onto the runtime
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn session(&self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut outbound) = mpsc::unbounded_channel::<Message>();
        self.runtime.attach(tx);

        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(message) => match message.encode() {
                        Ok(text) => {
                            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                                tracing::debug!(error = %e, "Write failed");
                                break;
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to encode message"),
                    },
                    None => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => self.runtime.handle_frame(&text),
                    Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.runtime.handle_frame(text),
                        Err(_) => tracing::warn!(len = data.len(), "Dropping non-UTF-8 frame"),
                    },
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Read failed");
                        break;
                    }
                },
            }
        }

        self.runtime.detach();
    }
}
