#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use v_talk_im::collab::{MemoryBlobStore, MemorySocialGraph, StaticIdentityResolver};
use v_talk_im::domain::{Emoticon, ImMessage, UserProfile};
use v_talk_im::presence::MemoryPresenceStore;
use v_talk_im::service::{ManualClock, PipelineSettings};
use v_talk_im::storage::MemoryChatStore;
use v_talk_im::{ChatServer, Components};

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;
pub const DAVE: i64 = 4;
pub const GROUP: i64 = 10;
/// 系统表情与 bob 收藏的表情 / a shared emoticon and one owned by bob
pub const SHARED_EMOTICON: i64 = 100;
pub const BOBS_EMOTICON: i64 = 101;
pub const FILE_BASE_URL: &str = "http://files.test";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

pub fn token_of(user_id: i64) -> String {
    format!("token-{}", user_id)
}

/// 内存版服务端及其各组件句柄 / In-memory server plus handles on every backend
pub struct Harness {
    pub server: ChatServer,
    pub graph: Arc<MemorySocialGraph>,
    pub store: Arc<MemoryChatStore>,
    pub presence: Arc<MemoryPresenceStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// alice 与 bob、carol 是好友，dave 没有好友；群 10 "team" 成员为 alice 与 bob
    /// alice-bob and alice-carol are friends, dave has none; group 10 "team" = {alice, bob}
    pub fn new() -> Self {
        let graph = Arc::new(MemorySocialGraph::new());
        graph
            .add_user(ALICE, "alice")
            .add_user(BOB, "bob")
            .add_user(CAROL, "carol")
            .add_user(DAVE, "dave")
            .add_friends(ALICE, BOB, "Bobby", "Ally")
            .add_friends(ALICE, CAROL, "Caz", "Al")
            .add_group(GROUP, "team")
            .add_member(GROUP, ALICE)
            .add_member(GROUP, BOB)
            .add_emoticon(emoticon(SHARED_EMOTICON, 0, "smile"))
            .add_emoticon(emoticon(BOBS_EMOTICON, BOB, ""));

        let mut identity = StaticIdentityResolver::new();
        for (id, nickname) in [(ALICE, "alice"), (BOB, "bob"), (CAROL, "carol"), (DAVE, "dave")] {
            identity = identity.with_token(
                &token_of(id),
                UserProfile { user_id: id, nickname: nickname.to_string(), avatar: String::new() },
            );
        }

        let store = Arc::new(MemoryChatStore::new());
        let presence = Arc::new(MemoryPresenceStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let components = Components {
            identity: Arc::new(identity),
            presence: presence.clone(),
            graph: graph.clone(),
            directory: graph.clone(),
            store: store.clone(),
            blobs: blobs.clone(),
            emoticons: graph.clone(),
            clock: clock.clone(),
        };
        let settings = PipelineSettings {
            revoke_window: chrono::Duration::seconds(120),
            file_base_url: FILE_BASE_URL.to_string(),
        };
        let server = ChatServer::new(components, settings, 100);
        Self { server, graph, store, presence, blobs, clock }
    }

    /// 注册一个会话的出站通道 / Register a session and hand back its outbound receiver
    pub fn open_session(&self, session_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.server.hub.register(session_id, tx);
        rx
    }

    /// 打开会话并完成连接 / Open a session and run the connect lifecycle
    pub async fn connect(
        &self,
        user_id: i64,
        session_id: &str,
    ) -> mpsc::UnboundedReceiver<Message> {
        let rx = self.open_session(session_id);
        self.server
            .connections
            .on_connect(&token_of(user_id), session_id)
            .await
            .expect("connect should succeed");
        rx
    }
}

fn emoticon(id: i64, owner: i64, describe: &str) -> Emoticon {
    Emoticon {
        id,
        user_id: owner,
        describe: describe.to_string(),
        url: format!("https://cdn.test/emoticon/{}.gif", id),
        suffix: "gif".to_string(),
        size: 2048,
    }
}

/// 收取已排队的帧；关闭帧记为 `close` / Drain queued frames; close frames become `close`
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ImMessage> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        match frame {
            Message::Text(text) => out.push(serde_json::from_str(&text).expect("valid event json")),
            Message::Close(_) => out.push(ImMessage::new("close", serde_json::Value::Null)),
            _ => {}
        }
    }
    out
}

pub fn names(events: &[ImMessage]) -> Vec<&str> {
    events.iter().map(|e| e.msg_type.as_str()).collect()
}
