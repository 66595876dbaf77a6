use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};

use crate::server::ChatServer;

pub const LIVE_PATH: &str = "/health/live";
pub const READY_PATH: &str = "/health/ready";

// 路由注册入口（GET）
// Route registration entry (GET)
pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource(LIVE_PATH).route(web::get().to(health_live_handle)));
    cfg.service(web::resource(READY_PATH).route(web::get().to(health_ready_handle)));
}

// 存活检查
// Liveness check
pub async fn health_live_handle() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "alive": true,
        "service": "v-talk-im",
        "timestamp": chrono::Utc::now().timestamp_millis()
    }))
}

// 就绪检查：记录存储可达
// Readiness: the record store answers a ping
pub async fn health_ready_handle(server: web::Data<ChatServer>) -> impl Responder {
    let store = server.store.ping().await;
    let ready = store.is_ok();
    let payload = serde_json::json!({
        "ready": ready,
        "service": "v-talk-im",
        "sessions": server.hub.session_count(),
        "store_error": store.err().map(|e| e.to_string()),
        "timestamp": chrono::Utc::now().timestamp_millis()
    });
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    HttpResponse::build(code).json(payload)
}
