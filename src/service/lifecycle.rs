//! 连接生命周期 / Connection lifecycle
//!
//! 每个连接：`Connecting -> Authenticated -> Active -> Closed`。
//! 单会话策略依赖 Presence Store 的原子 `bind`：先绑定并拿到旧会话，再踢出旧会话。

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collab::{IdentityResolver, SocialGraph};
use crate::domain::event::{names, ForcedLogout, FORCED_LOGOUT_MESSAGE};
use crate::domain::{PresenceNotice, UserProfile};
use crate::error::{ChatError, ChatResult};
use crate::presence::PresenceStore;
use crate::service::notify::Notifier;
use crate::ws::hub::{room_key, SessionHub};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// 成功建立的会话 / Result of a successful connect
#[derive(Clone, Debug)]
pub struct Connected {
    pub user: UserProfile,
    /// 被踢下线的旧会话 / session evicted by this connect
    pub evicted: Option<String>,
    pub rooms: Vec<String>,
}

pub struct ConnectionManager {
    identity: Arc<dyn IdentityResolver>,
    presence: Arc<dyn PresenceStore>,
    graph: Arc<dyn SocialGraph>,
    hub: Arc<SessionHub>,
    notifier: Arc<Notifier>,
    states: DashMap<String, ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        identity: Arc<dyn IdentityResolver>,
        presence: Arc<dyn PresenceStore>,
        graph: Arc<dyn SocialGraph>,
        hub: Arc<SessionHub>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self { identity, presence, graph, hub, notifier, states: DashMap::new() }
    }

    /// 会话当前状态，未知会话视为已关闭 / Current state; unknown sessions are `Closed`
    pub fn state(&self, session_id: &str) -> ConnectionState {
        self.states.get(session_id).map(|s| *s).unwrap_or(ConnectionState::Closed)
    }

    fn transition(&self, session_id: &str, state: ConnectionState) {
        debug!("session {} -> {:?}", session_id, state);
        if state == ConnectionState::Closed {
            self.states.remove(session_id);
        } else {
            self.states.insert(session_id.to_string(), state);
        }
    }

    fn abort(&self, session_id: &str, reason: &'static str) {
        self.transition(session_id, ConnectionState::Closed);
        self.hub.close(session_id, reason);
    }

    pub async fn on_connect(&self, token: &str, session_id: &str) -> ChatResult<Connected> {
        self.transition(session_id, ConnectionState::Connecting);

        let user = match self.identity.resolve(token).await {
            Ok(user) => user,
            Err(e) => {
                warn!("🔐 session {} rejected: {}", session_id, e);
                self.abort(session_id, "unauthorized");
                return Err(ChatError::Unauthorized);
            }
        };
        self.transition(session_id, ConnectionState::Authenticated);

        match self.activate(&user, session_id).await {
            Ok((evicted, rooms)) => {
                self.transition(session_id, ConnectionState::Active);
                info!("✅ user {} online on session {}", user.user_id, session_id);
                Ok(Connected { user, evicted, rooms })
            }
            Err(e) => {
                warn!("session {} failed to activate for user {}: {}", session_id, user.user_id, e);
                // 尽量撤销本次绑定 / undo our own binding if it was written
                if let Err(undo) = self.presence.unbind_session(user.user_id, session_id).await {
                    warn!(
                        "session {} kept a stale binding for user {}: {}",
                        session_id, user.user_id, undo
                    );
                }
                self.hub.leave_all(session_id);
                self.abort(session_id, "activation failed");
                Err(e)
            }
        }
    }

    async fn activate(
        &self,
        user: &UserProfile,
        session_id: &str,
    ) -> ChatResult<(Option<String>, Vec<String>)> {
        let user_id = user.user_id;
        let evicted = self.presence.bind(user_id, session_id).await?;

        if let Some(old) = evicted.as_deref() {
            info!("👢 user {} signed in elsewhere, evicting session {}", user_id, old);
            let notice = ForcedLogout { message: FORCED_LOGOUT_MESSAGE.to_string() };
            self.notifier.emit_to_session(old, names::FORCED_LOGOUT, &notice)?;
            self.hub.leave_all(old);
            self.hub.close(old, "signed in elsewhere");
            self.states.remove(old);
        }

        let mut rooms = Vec::new();
        for group_id in self.graph.groups_of(user_id).await? {
            let room = room_key(group_id);
            self.hub.join(&room, session_id);
            rooms.push(room);
        }
        // 加入房间期间可能已被更新的连接替换 / a newer connect may have replaced us while joining
        if self.presence.lookup_session_for_user(user_id).await?.as_deref() != Some(session_id) {
            self.hub.leave_all(session_id);
            rooms.clear();
        }

        if evicted.is_none() {
            self.broadcast_presence(user_id, 1).await?;
        }
        Ok((evicted, rooms))
    }

    /// 断开：仅当当前绑定的正是该会话时才解绑并广播离线
    /// Disconnect; unbinds and broadcasts only if this session still holds the binding
    pub async fn on_disconnect(&self, session_id: &str) -> ChatResult<bool> {
        let Some(user_id) = self.presence.lookup_user_for_session(session_id).await? else {
            self.transition(session_id, ConnectionState::Closed);
            return Ok(false);
        };

        let removed = self.presence.unbind_session(user_id, session_id).await?;
        self.transition(session_id, ConnectionState::Closed);
        if !removed {
            debug!("session {} already replaced for user {}", session_id, user_id);
            return Ok(false);
        }

        self.hub.leave_all(session_id);
        self.broadcast_presence(user_id, 0).await?;
        info!("👋 user {} offline (session {})", user_id, session_id);
        Ok(true)
    }

    async fn broadcast_presence(&self, user_id: i64, status: u8) -> ChatResult<()> {
        let event = if status == 1 { names::PRESENCE_ONLINE } else { names::PRESENCE_OFFLINE };
        let friends = self.graph.friends_of(user_id).await?;
        let mut delivered = 0usize;
        for friend in friends {
            let notice = PresenceNotice { user_id, remark: friend.remark, status };
            if self.notifier.emit(friend.user_id, event, &notice).await? {
                delivered += 1;
            }
        }
        debug!("{} for user {} delivered to {} friends", event, user_id, delivered);
        Ok(())
    }
}
