use serde::{Deserialize, Serialize};

/// 用户资料（鉴权结果与昵称查询共用）/ Resolved identity and display profile
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub nickname: String,
    #[serde(default)]
    pub avatar: String,
}

/// 好友条目 / Friend list entry as seen by the list owner
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FriendEntry {
    pub user_id: i64,
    /// 该好友对列表所有者的备注 / remark shown in presence notices
    #[serde(default)]
    pub remark: String,
}

/// 群资料 / Group display profile
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GroupProfile {
    pub group_id: i64,
    pub group_name: String,
    #[serde(default)]
    pub avatar: String,
}

/// 表情包中的单个表情 / One emoticon image
///
/// `user_id` 为 0 表示系统表情，所有人可用。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Emoticon {
    pub id: i64,
    pub user_id: i64,
    pub describe: String,
    pub url: String,
    pub suffix: String,
    pub size: i64,
}

impl Emoticon {
    pub fn usable_by(&self, user_id: i64) -> bool {
        self.user_id == 0 || self.user_id == user_id
    }
}
