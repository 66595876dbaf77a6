use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{ChatRecordStore, RecordQuery};
use crate::domain::{ChatRecord, MessageBody, MsgType, NewChatRecord, Source};
use crate::error::{ChatError, ChatResult};

#[derive(Default)]
struct StoreTables {
    next_id: i64,
    records: BTreeMap<i64, ChatRecord>,
    /// 附属表（文本以外的类型）/ side payloads keyed by record id
    payloads: HashMap<i64, MessageBody>,
    /// (user_id, record_id)
    deletions: HashSet<(i64, i64)>,
    /// (viewer, peer) -> 最后已读ID / last read record id
    read_cursors: HashMap<(i64, i64), i64>,
    /// 剩余允许写入的行数，`None` 为不限 / remaining row writes before failure injection
    writes_left: Option<usize>,
}

impl StoreTables {
    fn take_write(&mut self) -> ChatResult<()> {
        match self.writes_left.as_mut() {
            Some(0) => Err(ChatError::storage("injected write failure")),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// 在副本上暂存整批写入，成功后一次性提交 / Stage rows, commit only if every write succeeds
    fn insert_all(&mut self, records: Vec<NewChatRecord>) -> ChatResult<Vec<i64>> {
        let mut next_id = self.next_id;
        let mut staged = Vec::with_capacity(records.len());
        for new in records {
            next_id += 1;
            self.take_write()?;
            let (record, body) = new.into_record(next_id);
            if !matches!(body, MessageBody::Text(_)) {
                self.take_write()?;
            }
            staged.push((record, body));
        }

        let mut ids = Vec::with_capacity(staged.len());
        for (record, body) in staged {
            ids.push(record.id);
            if !matches!(body, MessageBody::Text(_)) {
                self.payloads.insert(record.id, body);
            }
            self.records.insert(record.id, record);
        }
        self.next_id = next_id;
        Ok(ids)
    }

    fn visible<'a>(
        &'a self,
        query: &'a RecordQuery,
    ) -> impl Iterator<Item = &'a ChatRecord> + 'a {
        self.records
            .values()
            .rev()
            .filter(move |r| query.matches(r) && !self.deletions.contains(&(query.viewer, r.id)))
    }

    /// 私聊按对方、群聊按群ID作为会话键 / Conversation key as seen by `viewer`
    fn conversation_key(
        viewer: i64,
        record: &ChatRecord,
        group_ids: &[i64],
    ) -> Option<(Source, i64)> {
        match record.source {
            Source::Direct if record.sender_id == viewer => {
                Some((Source::Direct, record.receive_id))
            }
            Source::Direct if record.receive_id == viewer => {
                Some((Source::Direct, record.sender_id))
            }
            Source::Group if group_ids.contains(&record.receive_id) => {
                Some((Source::Group, record.receive_id))
            }
            _ => None,
        }
    }
}

/// 内存聊天记录存储 / In-process record store
///
/// 一把锁包住所有表，事务即临界区。`fail_writes_after` 用于验证回滚。
#[derive(Default)]
pub struct MemoryChatStore {
    tables: Mutex<StoreTables>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 再成功写入 `rows` 行后开始失败（基础行与附属行各算一行）
    /// Let `rows` more row writes succeed, then fail every write
    pub fn fail_writes_after(&self, rows: usize) {
        self.tables.lock().writes_left = Some(rows);
    }

    pub fn clear_failures(&self) {
        self.tables.lock().writes_left = None;
    }

    pub fn record_count(&self) -> usize {
        self.tables.lock().records.len()
    }

    pub fn payload_count(&self) -> usize {
        self.tables.lock().payloads.len()
    }
}

#[async_trait]
impl ChatRecordStore for MemoryChatStore {
    async fn insert(&self, record: NewChatRecord) -> ChatResult<i64> {
        let ids = self.tables.lock().insert_all(vec![record])?;
        ids.into_iter().next().ok_or_else(|| ChatError::storage("insert returned no id"))
    }

    async fn insert_batch(&self, records: Vec<NewChatRecord>) -> ChatResult<Vec<i64>> {
        self.tables.lock().insert_all(records)
    }

    async fn find(&self, id: i64) -> ChatResult<Option<ChatRecord>> {
        Ok(self.tables.lock().records.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[i64]) -> ChatResult<Vec<ChatRecord>> {
        let tables = self.tables.lock();
        Ok(ids.iter().filter_map(|id| tables.records.get(id).cloned()).collect())
    }

    async fn load_payloads(
        &self,
        msg_type: MsgType,
        ids: &[i64],
    ) -> ChatResult<HashMap<i64, MessageBody>> {
        let tables = self.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                tables
                    .payloads
                    .get(id)
                    .filter(|body| body.msg_type() == msg_type)
                    .map(|body| (*id, body.clone()))
            })
            .collect())
    }

    async fn mark_revoked(&self, id: i64) -> ChatResult<ChatRecord> {
        let mut tables = self.tables.lock();
        let record = tables.records.get_mut(&id).ok_or(ChatError::NotFound)?;
        record.is_revoke = true;
        Ok(record.clone())
    }

    async fn query(&self, query: &RecordQuery) -> ChatResult<Vec<ChatRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .visible(query)
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count(&self, query: &RecordQuery) -> ChatResult<u64> {
        Ok(self.tables.lock().visible(query).count() as u64)
    }

    async fn insert_deletions(&self, user_id: i64, record_ids: &[i64]) -> ChatResult<()> {
        let mut tables = self.tables.lock();
        for id in record_ids {
            tables.deletions.insert((user_id, *id));
        }
        Ok(())
    }

    async fn conversation_heads(
        &self,
        viewer: i64,
        group_ids: &[i64],
    ) -> ChatResult<Vec<ChatRecord>> {
        let tables = self.tables.lock();
        let mut seen = HashSet::new();
        Ok(tables
            .records
            .values()
            .rev()
            .filter(|r| !tables.deletions.contains(&(viewer, r.id)))
            .filter(|r| {
                StoreTables::conversation_key(viewer, r, group_ids)
                    .is_some_and(|key| seen.insert(key))
            })
            .cloned()
            .collect())
    }

    async fn mark_read(&self, viewer: i64, peer: i64, up_to_id: i64) -> ChatResult<()> {
        let mut tables = self.tables.lock();
        let cursor = tables.read_cursors.entry((viewer, peer)).or_insert(0);
        *cursor = (*cursor).max(up_to_id);
        Ok(())
    }

    async fn unread_count(&self, viewer: i64, peer: i64) -> ChatResult<i64> {
        let tables = self.tables.lock();
        let cursor = tables.read_cursors.get(&(viewer, peer)).copied().unwrap_or(0);
        let unread = tables
            .records
            .range(cursor + 1..)
            .map(|(_, r)| r)
            .filter(|r| r.source == Source::Direct && r.sender_id == peer && r.receive_id == viewer)
            .filter(|r| !r.is_revoke && !tables.deletions.contains(&(viewer, r.id)))
            .count();
        Ok(unread as i64)
    }

    async fn ping(&self) -> ChatResult<()> {
        Ok(())
    }
}
