use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::server::ChatServer;
use crate::ws::handler::{handle_frame, SessionContext};

/// 从握手 URL 中取出 `token` 参数 / Extract `token` from the handshake query string
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// 处理新连接 / Handle one socket from handshake to close
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: ChatServer,
) -> Result<()> {
    let mut token = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        token = token_from_query(req.uri().query());
        Ok(resp)
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let session_id = Uuid::new_v4().to_string();
    server.hub.register(&session_id, tx);

    let sid = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                tracing::error!("Failed to send message to {}: {}", sid, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    tracing::info!("📨 session {} opened from {}", session_id, peer_addr);
    let token = token.unwrap_or_default();
    let connected = match server.connections.on_connect(&token, &session_id).await {
        Ok(connected) => connected,
        Err(e) => {
            tracing::warn!("session {} from {} refused: {}", session_id, peer_addr, e);
            // 关闭帧已入队，等待发送任务刷出 / close frame is queued; let the send task flush it
            server.hub.unregister(&session_id);
            let _ = send_task.await;
            return Ok(());
        }
    };
    let ctx = SessionContext { session_id: session_id.clone(), user_id: connected.user.user_id };

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(message) => handle_frame(&server, &ctx, message).await,
            Err(e) => {
                tracing::error!("WebSocket error from {}: {}", session_id, e);
                break;
            }
        }
    }

    if let Err(e) = server.connections.on_disconnect(&session_id).await {
        tracing::error!("disconnect cleanup failed for {}: {}", session_id, e);
    }
    server.hub.unregister(&session_id);
    send_task.abort();
    tracing::info!("👋 session {} closed", session_id);
    Ok(())
}
