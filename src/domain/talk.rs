use chrono::{DateTime, Utc};
use serde::Serialize;

use super::message::Source;

/// 会话列表条目 / One entry of a user's conversation list
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TalkItem {
    pub source: Source,
    /// 私聊对方ID，群聊为 0 / peer id for direct conversations
    pub friend_id: i64,
    /// 群ID，私聊为 0 / group id for group conversations
    pub group_id: i64,
    pub name: String,
    pub avatar: String,
    /// 当前用户给对方的备注 / caller's remark for the peer
    pub remark_name: String,
    pub unread_num: i64,
    pub msg_text: String,
    pub last_record_id: i64,
    pub updated_at: DateTime<Utc>,
    /// 对方是否在线（仅私聊）/ peer presence, direct conversations only
    pub online: bool,
}
