use serde::{Deserialize, Serialize};

/// 下发给客户端的事件名 / Event names pushed to clients
pub mod names {
    pub const FORCED_LOGOUT: &str = "forced-logout";
    pub const PRESENCE_ONLINE: &str = "presence-online";
    pub const PRESENCE_OFFLINE: &str = "presence-offline";
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const REVOKE_MESSAGE: &str = "revoke_message";
    pub const TALK_LIST: &str = "talk_list";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// 被踢下线提示 / Message attached to `forced-logout`
pub const FORCED_LOGOUT_MESSAGE: &str =
    "Your account has signed in elsewhere. If this was not you, change your password.";

/// IM 事件信封 / IM event envelope, used in both directions
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ImMessage {
    pub fn new(msg_type: &str, data: serde_json::Value) -> Self {
        Self { msg_type: msg_type.to_string(), data }
    }
}

/// 好友上下线通知 / Friend presence notice
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PresenceNotice {
    pub user_id: i64,
    pub remark: String,
    /// 1: 在线 0: 离线
    pub status: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ForcedLogout {
    pub message: String,
}

/// 错误事件 / Error reply sent to the requesting session only
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub code: i32,
    pub message: String,
}

impl From<&crate::error::ChatError> for ErrorNotice {
    fn from(err: &crate::error::ChatError) -> Self {
        Self { code: err.code(), message: err.to_string() }
    }
}
