/// HTTP 健康检查 / HTTP health checks
pub mod health;

use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing::info;

use crate::server::ChatServer;

/// 启动HTTP服务器 / Start the HTTP server
pub async fn run(server: ChatServer, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("🌐 HTTP server listening on http://{}", addr);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server.clone()))
            .configure(health::register)
    })
    .bind(addr)?
    .run()
    .await?;
    Ok(())
}
