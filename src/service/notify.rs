use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::event::names;
use crate::domain::{ChatRecord, ImMessage, RecordView, Source};
use crate::error::ChatResult;
use crate::presence::PresenceStore;
use crate::ws::hub::{room_key, SessionHub};

/// 通知扇出 / Notification fanout
///
/// 尽力而为、至多一次：目标不在线直接丢弃，不排队也不重试。
pub struct Notifier {
    presence: Arc<dyn PresenceStore>,
    hub: Arc<SessionHub>,
}

impl Notifier {
    pub fn new(presence: Arc<dyn PresenceStore>, hub: Arc<SessionHub>) -> Self {
        Self { presence, hub }
    }

    fn event<T: Serialize>(event: &str, payload: &T) -> ChatResult<ImMessage> {
        Ok(ImMessage::new(event, serde_json::to_value(payload)?))
    }

    /// 推送给单个用户，返回是否投递 / Push to one user; `false` when offline
    pub async fn emit<T: Serialize + Sync>(
        &self,
        user_id: i64,
        event: &str,
        payload: &T,
    ) -> ChatResult<bool> {
        let message = Self::event(event, payload)?;
        Ok(self.emit_message(user_id, &message).await)
    }

    async fn emit_message(&self, user_id: i64, message: &ImMessage) -> bool {
        match self.presence.lookup_session_for_user(user_id).await {
            Ok(Some(session_id)) => self.hub.send_event(&session_id, message),
            Ok(None) => {
                debug!("user {} offline, {} dropped", user_id, message.msg_type);
                false
            }
            Err(e) => {
                warn!("presence lookup failed for user {}: {}", user_id, e);
                false
            }
        }
    }

    /// 逐个目标独立投递，返回成功数 / Independent per-target delivery
    pub async fn emit_many<T: Serialize + Sync>(
        &self,
        user_ids: &[i64],
        event: &str,
        payload: &T,
    ) -> ChatResult<usize> {
        let message = Self::event(event, payload)?;
        let mut delivered = 0;
        for user_id in user_ids {
            if self.emit_message(*user_id, &message).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// 直接推送到会话（不经过 Presence Store）/ Push to a session id directly
    pub fn emit_to_session<T: Serialize>(
        &self,
        session_id: &str,
        event: &str,
        payload: &T,
    ) -> ChatResult<bool> {
        Ok(self.hub.send_event(session_id, &Self::event(event, payload)?))
    }

    pub fn emit_room<T: Serialize>(
        &self,
        room: &str,
        event: &str,
        payload: &T,
    ) -> ChatResult<usize> {
        Ok(self.hub.send_room(room, &Self::event(event, payload)?))
    }

    /// 新消息投递：群消息发到房间，私聊发给双方 / Deliver a new record view
    pub async fn deliver_record(&self, view: &RecordView) -> ChatResult<usize> {
        match view.source {
            Source::Group => self.emit_room(&room_key(view.receive_id), names::CHAT_MESSAGE, view),
            Source::Direct => {
                let targets = participants(view.user_id, view.receive_id);
                self.emit_many(&targets, names::CHAT_MESSAGE, view).await
            }
        }
    }

    /// 撤回通知 / Announce a revoke to the conversation
    pub async fn announce_revoke(&self, record: &ChatRecord) -> ChatResult<usize> {
        let payload = serde_json::json!({
            "record_id": record.id,
            "source": record.source,
            "user_id": record.sender_id,
            "receive_id": record.receive_id,
        });
        match record.source {
            Source::Group => {
                self.emit_room(&room_key(record.receive_id), names::REVOKE_MESSAGE, &payload)
            }
            Source::Direct => {
                let targets = participants(record.sender_id, record.receive_id);
                self.emit_many(&targets, names::REVOKE_MESSAGE, &payload).await
            }
        }
    }
}

fn participants(a: i64, b: i64) -> Vec<i64> {
    if a == b {
        vec![a]
    } else {
        vec![a, b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::MemoryPresenceStore;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn emit_many_skips_offline_targets() {
        let presence = Arc::new(MemoryPresenceStore::new());
        let hub = Arc::new(SessionHub::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register("s1", tx);
        presence.bind(1, "s1").await.unwrap();

        let notifier = Notifier::new(presence, hub);
        let payload = serde_json::json!({});
        let delivered = notifier.emit_many(&[1, 2, 3], "presence-online", &payload).await.unwrap();
        assert_eq!(delivered, 1);

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        let event: ImMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(event.msg_type, "presence-online");
    }

    #[tokio::test]
    async fn emit_to_offline_user_is_not_an_error() {
        let notifier =
            Notifier::new(Arc::new(MemoryPresenceStore::new()), Arc::new(SessionHub::new()));
        assert!(!notifier.emit(42, "presence-offline", &serde_json::json!({})).await.unwrap());
    }
}
