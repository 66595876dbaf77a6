use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use v_talk_im::comm::config::install_global_config_manager;
use v_talk_im::comm::{init_tracing, ConfigManager, ConfigSource};
use v_talk_im::server::ChatServer;

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "v-talk-im presence and message delivery server",
    long_about = None
)]
pub struct Args {
    /// 额外的配置文件（优先级高于 config/*.toml）
    /// Extra config file, layered above config/*.toml
    #[arg(short = 'c', long = "config")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let sources = match &args.config {
        Some(path) => vec![ConfigSource::File { path: path.clone(), format: None, required: true }],
        None => Vec::new(),
    };
    let cm = install_global_config_manager(ConfigManager::with_sources(sources)?)?;

    // 初始化日志 / Initialize logging
    init_tracing()?;
    info!("🎯 Starting v-talk-im (WebSocket + HTTP)...");
    for source in cm.active_sources() {
        info!("🔧 config source: {} {}", source.source_type, source.description);
    }

    let cfg = v_talk_im::config::load()?;
    let server = ChatServer::from_config(&cfg).await?;

    let ws_server = server.clone();
    let ws_host = cfg.server.host.clone();
    let ws_port = cfg.server.ws_port;
    let ws_future = async move {
        if let Err(e) = v_talk_im::ws::server::run(ws_server, &ws_host, ws_port).await {
            error!("❌ WebSocket server error: {}", e);
        }
    };

    let http_host = cfg.server.host.clone();
    let http_port = cfg.server.http_port;
    let http_future = async move {
        if let Err(e) = v_talk_im::api::run(server, &http_host, http_port).await {
            error!("❌ HTTP server error: {}", e);
        }
    };

    tokio::select! {
        _ = ws_future => info!("WebSocket server stopped"),
        _ = http_future => info!("HTTP server stopped"),
        _ = tokio::signal::ctrl_c() => info!("🛑 shutdown signal received"),
    }
    Ok(())
}
