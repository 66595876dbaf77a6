use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::domain::event::{names, ErrorNotice};
use crate::domain::{Conversation, ImMessage, Source};
use crate::error::{ChatError, ChatResult};
use crate::server::ChatServer;

/// 已认证会话 / Authenticated session an inbound frame belongs to
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: i64,
}

#[derive(Deserialize)]
struct TalkMessage {
    source: Source,
    receive_id: i64,
    text: String,
}

#[derive(Deserialize)]
struct CodeMessage {
    source: Source,
    receive_id: i64,
    lang: String,
    code: String,
}

#[derive(Deserialize)]
struct EmoticonMessage {
    source: Source,
    receive_id: i64,
    emoticon_id: i64,
}

#[derive(Deserialize)]
struct RevokeMessage {
    record_id: i64,
}

#[derive(Deserialize)]
struct ClearUnread {
    receive_id: i64,
}

fn parse<T: for<'de> Deserialize<'de>>(data: serde_json::Value) -> ChatResult<T> {
    serde_json::from_value(data).map_err(|e| ChatError::invalid(e.to_string()))
}

/// 处理一帧入站消息，失败时只回复给发送者
/// Handle one inbound frame; errors go back to the sender only
pub async fn handle_frame(server: &ChatServer, ctx: &SessionContext, message: Message) {
    let Message::Text(text) = message else {
        return;
    };
    debug!("📨 frame from session {}: {}", ctx.session_id, text);
    let result = match serde_json::from_str::<ImMessage>(&text) {
        Ok(event) => dispatch(server, ctx, event).await,
        Err(_) => Err(ChatError::invalid("invalid json")),
    };
    if let Err(e) = result {
        warn!("event from user {} failed: {}", ctx.user_id, e);
        let notice = ErrorNotice::from(&e);
        match server.notifier.emit_to_session(&ctx.session_id, names::ERROR, &notice) {
            Ok(true) => {}
            Ok(false) => debug!("session {} gone before the error reply", ctx.session_id),
            Err(reply) => warn!("error reply to session {} failed: {}", ctx.session_id, reply),
        }
    }
}

/// 按事件类型分发 / Route a decoded client event
pub async fn dispatch(
    server: &ChatServer,
    ctx: &SessionContext,
    event: ImMessage,
) -> ChatResult<()> {
    match event.msg_type.as_str() {
        "ping" => {
            let pong = serde_json::json!({ "timestamp": chrono::Utc::now().timestamp_millis() });
            server.notifier.emit_to_session(&ctx.session_id, names::PONG, &pong)?;
        }
        "talk_message" => {
            let msg: TalkMessage = parse(event.data)?;
            let conversation = Conversation { source: msg.source, receive_id: msg.receive_id };
            let id = server.pipeline.send_text(ctx.user_id, conversation, &msg.text).await?;
            deliver(server, id).await?;
        }
        "code_message" => {
            let msg: CodeMessage = parse(event.data)?;
            let conversation = Conversation { source: msg.source, receive_id: msg.receive_id };
            let id =
                server.pipeline.send_code(ctx.user_id, conversation, &msg.lang, &msg.code).await?;
            deliver(server, id).await?;
        }
        "emoticon_message" => {
            let msg: EmoticonMessage = parse(event.data)?;
            let conversation = Conversation { source: msg.source, receive_id: msg.receive_id };
            let id =
                server.pipeline.send_emoticon(ctx.user_id, conversation, msg.emoticon_id).await?;
            deliver(server, id).await?;
        }
        "revoke_message" => {
            let msg: RevokeMessage = parse(event.data)?;
            let record = server.pipeline.revoke_message(ctx.user_id, msg.record_id).await?;
            server.notifier.announce_revoke(&record).await?;
        }
        "talk_list" => {
            let items = server.talks.talks(ctx.user_id).await?;
            server.notifier.emit_to_session(&ctx.session_id, names::TALK_LIST, &items)?;
        }
        "clear_unread" => {
            let msg: ClearUnread = parse(event.data)?;
            server.talks.clear_unread(ctx.user_id, msg.receive_id).await?;
        }
        other => return Err(ChatError::invalid(format!("unknown event {}", other))),
    }
    Ok(())
}

async fn deliver(server: &ChatServer, record_id: i64) -> ChatResult<()> {
    let view = server.pipeline.view(record_id).await?;
    let delivered = server.notifier.deliver_record(&view).await?;
    debug!("record {} delivered to {} sessions", record_id, delivered);
    Ok(())
}
