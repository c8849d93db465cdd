//! Per-socket connection task
//!
//! Performs the WebSocket upgrade on the configured path, registers the
//! socket with the dispatcher, then pumps frames in both directions until
//! either side closes or the connection is terminated by the registry.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::error::Result;
use crate::protocol::Message;
use crate::registry::{Outbound, SocketHandle};

use super::dispatcher::Dispatcher;

/// Upgrade a TCP stream, refusing any path other than `path`
pub(crate) async fn upgrade(
    stream: TcpStream,
    path: &str,
) -> Result<WebSocketStream<TcpStream>> {
    let expected = path.to_string();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            if req.uri().path() == expected {
                return Ok(resp);
            }
            tracing::debug!(path = req.uri().path(), "Upgrade refused: unknown path");
            let mut refused = ErrorResponse::new(Some("Not Found".to_string()));
            *refused.status_mut() = StatusCode::NOT_FOUND;
            Err(refused)
        },
    )
    .await?;
    Ok(ws)
}

/// Serve an upgraded socket until it closes
pub(crate) async fn serve(
    ws: WebSocketStream<TcpStream>,
    peer_addr: SocketAddr,
    dispatcher: Dispatcher,
) {
    let (mut sink, mut stream) = ws.split();
    let (socket, mut outbound) = SocketHandle::channel();
    let id = dispatcher.connect(socket).await;

    tracing::debug!(conn_id = %id, peer = %peer_addr, "WebSocket session started");

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text.to_string())).await {
                        tracing::debug!(conn_id = %id, error = %e, "Write failed");
                        break;
                    }
                }
                // Hard close: drop the socket without a close handshake
                Some(Outbound::Terminate) | None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => dispatcher.handle_frame(&id, &text).await,
                Some(Ok(WsMessage::Binary(data))) => dispatcher.handle_binary(&id, &data).await,
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = sink.send(WsMessage::Pong(payload)).await;
                }
                // Transport-level pong counts as a protocol pong
                Some(Ok(WsMessage::Pong(_))) => dispatcher.handle_message(&id, Message::Pong).await,
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %id, error = %e, "Read failed");
                    break;
                }
            },
        }
    }

    dispatcher.disconnect(&id).await;
    tracing::debug!(conn_id = %id, peer = %peer_addr, "WebSocket session ended");
}
