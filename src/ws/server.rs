use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::ChatServer;

/// 启动WS监听 / Start the WebSocket listener
pub async fn run(server: ChatServer, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🚀 v-talk-im WebSocket server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            let handled = crate::ws::connection::handle_connection(stream, peer_addr, server).await;
            if let Err(e) = handled {
                tracing::error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}
