//! 聊天记录存储 / Chat Record Store
//!
//! 只追加的记录表 + 按类型区分的附属表。`insert` 与 `insert_batch` 把基础行与附属行
//! 放在同一个事务里写入，失败时全部回滚。

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::domain::{ChatRecord, Conversation, MessageBody, MsgType, NewChatRecord};
use crate::error::ChatResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

/// 历史/搜索查询条件 / Filter shared by history listing and search
#[derive(Clone, Debug)]
pub struct RecordQuery {
    /// 查询者（用于私聊双向匹配与删除标记过滤）/ viewer, used for the direct pair and tombstones
    pub viewer: i64,
    pub conversation: Conversation,
    /// 只返回 id 小于该值的记录 / cursor, exclusive
    pub before_id: Option<i64>,
    pub msg_types: Vec<MsgType>,
    pub keyword: Option<String>,
    pub date: Option<NaiveDate>,
    pub limit: usize,
    pub offset: usize,
}

impl RecordQuery {
    pub fn new(viewer: i64, conversation: Conversation) -> Self {
        Self {
            viewer,
            conversation,
            before_id: None,
            msg_types: Vec::new(),
            keyword: None,
            date: None,
            limit: 30,
            offset: 0,
        }
    }

    /// 内存实现与测试共用的匹配规则 / Row predicate, excluding the tombstone check
    pub fn matches(&self, record: &ChatRecord) -> bool {
        if !record.belongs_to(self.viewer, &self.conversation) {
            return false;
        }
        if let Some(before) = self.before_id {
            if record.id >= before {
                return false;
            }
        }
        if !self.msg_types.is_empty() && !self.msg_types.contains(&record.msg_type) {
            return false;
        }
        if let Some(keyword) = self.keyword.as_deref().filter(|k| !k.is_empty()) {
            match record.content.as_deref() {
                Some(content) if content.contains(keyword) => {}
                _ => return false,
            }
        }
        if let Some(date) = self.date {
            if record.created_at.date_naive() != date {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait ChatRecordStore: Send + Sync {
    /// 写入一条记录及其附属数据，返回新ID / Insert record + payload atomically
    async fn insert(&self, record: NewChatRecord) -> ChatResult<i64>;

    /// 批量写入，全部成功或全部回滚 / All-or-nothing batch insert, ids in input order
    async fn insert_batch(&self, records: Vec<NewChatRecord>) -> ChatResult<Vec<i64>>;

    async fn find(&self, id: i64) -> ChatResult<Option<ChatRecord>>;

    /// 按ID批量读取（不保证顺序，缺失的ID直接跳过）/ Batch read; missing ids are skipped
    async fn find_many(&self, ids: &[i64]) -> ChatResult<Vec<ChatRecord>>;

    /// 批量读取某一类型的附属数据 / Batch-fetch the side payloads of one type
    ///
    /// 文本记录的内容在基础行上，这里只处理带附属表的类型。
    async fn load_payloads(
        &self,
        msg_type: MsgType,
        ids: &[i64],
    ) -> ChatResult<HashMap<i64, MessageBody>>;

    /// 标记撤回，返回更新后的记录 / Flip `is_revoke`
    async fn mark_revoked(&self, id: i64) -> ChatResult<ChatRecord>;

    /// 按 id 倒序查询，排除 viewer 的删除标记 / Newest first, tombstones for the viewer excluded
    async fn query(&self, query: &RecordQuery) -> ChatResult<Vec<ChatRecord>>;

    /// 与 `query` 相同条件下的总数（忽略 limit/offset）/ Total under the same filter
    async fn count(&self, query: &RecordQuery) -> ChatResult<u64>;

    /// 写入删除标记，重复标记忽略 / Insert tombstones; duplicates are ignored
    async fn insert_deletions(&self, user_id: i64, record_ids: &[i64]) -> ChatResult<()>;

    /// 每个会话的最新一条记录，按 id 倒序 / Newest visible record of every conversation
    ///
    /// 私聊按对方分组，群聊只看 `group_ids` 中的群；viewer 的删除标记被排除。
    async fn conversation_heads(
        &self,
        viewer: i64,
        group_ids: &[i64],
    ) -> ChatResult<Vec<ChatRecord>>;

    /// 推进私聊已读游标，只进不退 / Advance the direct read cursor; never moves backwards
    async fn mark_read(&self, viewer: i64, peer: i64, up_to_id: i64) -> ChatResult<()>;

    /// `peer` 发给 `viewer` 且在游标之后的未撤回消息数
    /// Records from `peer` to `viewer` past the read cursor, revoked and deleted ones excluded
    async fn unread_count(&self, viewer: i64, peer: i64) -> ChatResult<i64>;

    async fn ping(&self) -> ChatResult<()>;
}
