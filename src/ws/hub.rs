use dashmap::{DashMap, DashSet};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::domain::ImMessage;

/// 群房间键 / Room key of a group
pub fn room_key(group_id: i64) -> String {
    format!("room{}", group_id)
}

/// 会话中心：会话出站通道与房间成员 / Outbound channels of live sessions plus room membership
///
/// 只负责传输层投递，不关心用户身份；用户到会话的映射在 Presence Store 中。
#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<String, mpsc::UnboundedSender<Message>>, // 会话 -> 发送器 / senders
    rooms: DashMap<String, DashSet<String>>,                   // 房间 -> 会话 / members
    joined: DashMap<String, DashSet<String>>,                  // 会话 -> 房间 / rooms
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话出站通道 / Register the outbound channel of a session
    pub fn register(&self, session_id: &str, sender: mpsc::UnboundedSender<Message>) {
        self.sessions.insert(session_id.to_string(), sender);
    }

    /// 移除会话并退出所有房间 / Drop the session and leave all rooms
    pub fn unregister(&self, session_id: &str) {
        self.leave_all(session_id);
        self.sessions.remove(session_id);
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 发送原始帧，会话不存在或已断开返回 false / Best-effort raw send
    pub fn send(&self, session_id: &str, message: Message) -> bool {
        match self.sessions.get(session_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => {
                debug!("session {} not connected, frame dropped", session_id);
                false
            }
        }
    }

    pub fn send_event(&self, session_id: &str, event: &ImMessage) -> bool {
        match serde_json::to_string(event) {
            Ok(text) => self.send(session_id, Message::Text(text)),
            Err(_) => false,
        }
    }

    /// 发送关闭帧，由发送任务关闭底层连接 / Queue a close frame; the send task closes the socket
    pub fn close(&self, session_id: &str, reason: &'static str) -> bool {
        let frame = CloseFrame { code: CloseCode::Normal, reason: Cow::Borrowed(reason) };
        self.send(session_id, Message::Close(Some(frame)))
    }

    pub fn join(&self, room: &str, session_id: &str) {
        self.rooms.entry(room.to_string()).or_default().insert(session_id.to_string());
        self.joined.entry(session_id.to_string()).or_default().insert(room.to_string());
    }

    pub fn leave_all(&self, session_id: &str) {
        let Some((_, rooms)) = self.joined.remove(session_id) else {
            return;
        };
        for room in rooms.iter() {
            let empty = match self.rooms.get(room.key()) {
                Some(members) => {
                    members.remove(session_id);
                    members.is_empty()
                }
                None => false,
            };
            if empty {
                self.rooms.remove_if(room.key(), |_, members| members.is_empty());
            }
        }
    }

    pub fn room_members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(|s| s.key().clone()).collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, session_id: &str) -> Vec<String> {
        self.joined
            .get(session_id)
            .map(|rooms| rooms.iter().map(|r| r.key().clone()).collect())
            .unwrap_or_default()
    }

    /// 向房间内所有会话投递，返回成功数 / Push to every session of the room
    pub fn send_room(&self, room: &str, event: &ImMessage) -> usize {
        let Ok(text) = serde_json::to_string(event) else {
            return 0;
        };
        self.room_members(room)
            .iter()
            .filter(|sid| self.send(sid, Message::Text(text.clone())))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_leave_rooms() {
        let hub = SessionHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register("s1", tx);
        hub.join(&room_key(7), "s1");
        hub.join(&room_key(8), "s1");
        assert_eq!(hub.room_members("room7"), vec!["s1".to_string()]);

        hub.leave_all("s1");
        assert!(hub.room_members("room7").is_empty());
        assert!(hub.rooms_of("s1").is_empty());
    }

    #[tokio::test]
    async fn send_room_reaches_members_only() {
        let hub = SessionHub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.register("a", tx1);
        hub.register("b", tx2);
        hub.join("room1", "a");

        let sent = hub.send_room("room1", &ImMessage::new("chat_message", serde_json::json!({})));
        assert_eq!(sent, 1);
        assert!(matches!(rx1.recv().await, Some(Message::Text(_))));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn send_to_unknown_session_is_dropped() {
        let hub = SessionHub::new();
        assert!(!hub.send_event("ghost", &ImMessage::new("pong", serde_json::Value::Null)));
        assert!(!hub.close("ghost", "bye"));
    }
}
