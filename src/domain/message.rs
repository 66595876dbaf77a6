//! 聊天记录领域模型 / Chat record domain model
//!
//! 基础记录 + 按类型区分的附属数据，用和类型 `MessageBody` 表达，
//! 不存在“哪张附属表有数据”的歧义。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ChatError;

/// 消息来源 / Conversation kind
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum Source {
    Direct = 1,
    Group = 2,
}

impl TryFrom<i16> for Source {
    type Error = ChatError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Source::Direct),
            2 => Ok(Source::Group),
            other => Err(ChatError::invalid(format!("unknown source {}", other))),
        }
    }
}

impl From<Source> for i16 {
    fn from(value: Source) -> Self {
        value as i16
    }
}

/// 消息类型 / Message type
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum MsgType {
    Text = 1,
    File = 2,
    Invite = 3,
    Forward = 4,
    Code = 5,
}

impl MsgType {
    /// 可被转发的类型 / Types that may be forwarded
    pub const FORWARDABLE: [MsgType; 3] = [MsgType::Text, MsgType::File, MsgType::Code];

    pub fn is_forwardable(self) -> bool {
        Self::FORWARDABLE.contains(&self)
    }
}

impl TryFrom<i16> for MsgType {
    type Error = ChatError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MsgType::Text),
            2 => Ok(MsgType::File),
            3 => Ok(MsgType::Invite),
            4 => Ok(MsgType::Forward),
            5 => Ok(MsgType::Code),
            other => Err(ChatError::invalid(format!("unknown msg_type {}", other))),
        }
    }
}

impl From<MsgType> for i16 {
    fn from(value: MsgType) -> Self {
        value as i16
    }
}

/// 群通知类型 / Group notice kind
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum InviteType {
    /// 邀请入群 / users were invited in
    Join = 1,
    /// 主动退群 / operator left
    Leave = 2,
    /// 被移出群 / users were removed
    Remove = 3,
}

impl InviteType {
    /// 是否涉及多个被操作用户 / Whether the notice lists affected users
    pub fn lists_affected_users(self) -> bool {
        matches!(self, InviteType::Join | InviteType::Remove)
    }
}

impl TryFrom<i16> for InviteType {
    type Error = ChatError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(InviteType::Join),
            2 => Ok(InviteType::Leave),
            3 => Ok(InviteType::Remove),
            other => Err(ChatError::invalid(format!("unknown invite type {}", other))),
        }
    }
}

impl From<InviteType> for i16 {
    fn from(value: InviteType) -> Self {
        value as i16
    }
}

/// 聊天记录（基础行）/ Canonical message envelope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: i64,
    pub source: Source,
    pub msg_type: MsgType,
    pub sender_id: i64,
    /// 好友ID或群ID / peer user id or group id
    pub receive_id: i64,
    pub content: Option<String>,
    pub is_revoke: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatRecord {
    /// 记录是否属于 `viewer` 视角下的会话
    /// Whether the record belongs to the conversation seen by `viewer`
    pub fn belongs_to(&self, viewer: i64, conversation: &Conversation) -> bool {
        if self.source != conversation.source {
            return false;
        }
        match conversation.source {
            Source::Direct => {
                (self.sender_id == viewer && self.receive_id == conversation.receive_id)
                    || (self.sender_id == conversation.receive_id && self.receive_id == viewer)
            }
            Source::Group => self.receive_id == conversation.receive_id,
        }
    }

    /// 记录所在会话的寻址键（群消息）或参与者对（私聊）
    pub fn conversation(&self) -> Conversation {
        Conversation { source: self.source, receive_id: self.receive_id }
    }
}

/// 会话寻址：私聊为对方用户ID，群聊为群ID / Conversation addressing key
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conversation {
    pub source: Source,
    pub receive_id: i64,
}

impl Conversation {
    pub fn direct(peer_id: i64) -> Self {
        Self { source: Source::Direct, receive_id: peer_id }
    }

    pub fn group(group_id: i64) -> Self {
        Self { source: Source::Group, receive_id: group_id }
    }
}

/// 文件消息附属数据 / File payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilePayload {
    pub user_id: i64,
    /// 1: 用户上传 2: 表情包
    pub file_source: i16,
    /// 1: 图片 2: 视频 3: 其它文件
    pub file_type: i16,
    pub save_type: i16,
    pub original_name: String,
    pub suffix: String,
    pub size: i64,
    pub save_dir: String,
}

/// 代码块附属数据，`code` 以 HTML 转义形式存储 / Code payload, stored HTML-escaped
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodePayload {
    pub user_id: i64,
    pub lang: String,
    pub code: String,
}

/// 合并转发摘要项 / One preview line of a merged forward
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewItem {
    pub nickname: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardPayload {
    pub user_id: i64,
    /// 被转发的源记录ID（有序）/ Ordered source record ids
    pub record_ids: Vec<i64>,
    pub preview: Vec<PreviewItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvitePayload {
    pub operator_id: i64,
    pub invite_type: InviteType,
    pub user_ids: Vec<i64>,
}

/// 消息体：按类型区分的和类型 / Tagged message body
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody {
    Text(String),
    File(FilePayload),
    Code(CodePayload),
    Forward(ForwardPayload),
    Invite(InvitePayload),
}

impl MessageBody {
    pub fn msg_type(&self) -> MsgType {
        match self {
            MessageBody::Text(_) => MsgType::Text,
            MessageBody::File(_) => MsgType::File,
            MessageBody::Code(_) => MsgType::Code,
            MessageBody::Forward(_) => MsgType::Forward,
            MessageBody::Invite(_) => MsgType::Invite,
        }
    }

    /// 写入基础行 `content` 列的内容 / What goes into the base row's content column
    pub fn content(&self) -> Option<&str> {
        match self {
            MessageBody::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

/// 待写入的记录 / Record to be inserted (id assigned by the store)
#[derive(Clone, Debug, PartialEq)]
pub struct NewChatRecord {
    pub source: Source,
    pub sender_id: i64,
    pub receive_id: i64,
    pub created_at: DateTime<Utc>,
    pub body: MessageBody,
}

impl NewChatRecord {
    pub fn into_record(self, id: i64) -> (ChatRecord, MessageBody) {
        let record = ChatRecord {
            id,
            source: self.source,
            msg_type: self.body.msg_type(),
            sender_id: self.sender_id,
            receive_id: self.receive_id,
            content: self.body.content().map(str::to_string),
            is_revoke: false,
            created_at: self.created_at,
        };
        (record, self.body)
    }
}

// ============================================================================
// 读取视图 / Read views
// ============================================================================

/// 用户简要信息 / Id + display name
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBrief {
    pub id: i64,
    pub nickname: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileView {
    pub file_source: i16,
    pub file_type: i16,
    pub save_type: i16,
    pub original_name: String,
    pub suffix: String,
    pub size: i64,
    pub save_dir: String,
    pub file_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CodeView {
    pub lang: String,
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ForwardView {
    pub num: usize,
    pub list: Vec<PreviewItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InviteView {
    pub invite_type: InviteType,
    pub operate_user: UserBrief,
    pub users: Vec<UserBrief>,
}

/// 自包含的记录视图 / Self-contained hydrated record
///
/// 不适用的附属对象序列化为 `{}`，而不是 `null`。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordView {
    pub id: i64,
    pub source: Source,
    pub msg_type: MsgType,
    pub user_id: i64,
    pub receive_id: i64,
    pub nickname: String,
    pub avatar: String,
    pub content: String,
    pub is_revoke: bool,
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "empty_object_if_none")]
    pub file: Option<FileView>,
    #[serde(serialize_with = "empty_object_if_none")]
    pub code_block: Option<CodeView>,
    #[serde(serialize_with = "empty_object_if_none")]
    pub forward: Option<ForwardView>,
    #[serde(serialize_with = "empty_object_if_none")]
    pub invite: Option<InviteView>,
}

fn empty_object_if_none<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    match value {
        Some(inner) => inner.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

/// 分页结果 / Page object returned by search
#[derive(Clone, Debug, Serialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub page_total: u32,
}

impl<T> Page<T> {
    pub fn new(rows: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        let page_total = if page_size == 0 {
            0
        } else {
            total.div_ceil(u64::from(page_size)) as u32
        };
        Self { rows, total, page, page_size, page_total }
    }
}
