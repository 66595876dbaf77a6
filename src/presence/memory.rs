use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::PresenceStore;
use crate::error::ChatResult;

#[derive(Default)]
struct PresenceTables {
    uid_to_session: HashMap<i64, String>,
    session_to_uid: HashMap<String, i64>,
}

impl PresenceTables {
    fn agrees(&self, user_id: i64, session_id: &str) -> bool {
        self.uid_to_session.get(&user_id).map(String::as_str) == Some(session_id)
            && self.session_to_uid.get(session_id) == Some(&user_id)
    }

    /// 反向条目的持有者已不再指回该会话时删除
    /// Drop a reverse entry whose holder no longer points back
    fn drop_reverse_if_stale(&mut self, session_id: &str) {
        if let Some(holder) = self.session_to_uid.get(session_id).copied() {
            if self.uid_to_session.get(&holder).map(String::as_str) != Some(session_id) {
                self.session_to_uid.remove(session_id);
            }
        }
    }
}

/// 进程内在线状态表，单锁保证多键原子性 / In-process presence tables behind one lock
#[derive(Default)]
pub struct MemoryPresenceStore {
    tables: Mutex<PresenceTables>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前绑定数 / Number of live forward entries
    pub fn len(&self) -> usize {
        self.tables.lock().uid_to_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn bind(&self, user_id: i64, session_id: &str) -> ChatResult<Option<String>> {
        let mut t = self.tables.lock();
        let previous = t.uid_to_session.remove(&user_id);
        if let Some(prev) = &previous {
            t.drop_reverse_if_stale(prev);
        }
        // 该会话若残留指向其它用户的反向条目，一并清理 / drop a stale holder of this session id
        if let Some(holder) = t.session_to_uid.get(session_id).copied() {
            if holder != user_id
                && t.uid_to_session.get(&holder).map(String::as_str) == Some(session_id)
            {
                t.uid_to_session.remove(&holder);
            }
        }
        t.uid_to_session.insert(user_id, session_id.to_string());
        t.session_to_uid.insert(session_id.to_string(), user_id);
        Ok(previous.filter(|prev| prev != session_id))
    }

    async fn unbind(&self, user_id: i64) -> ChatResult<Option<String>> {
        let mut t = self.tables.lock();
        let removed = t.uid_to_session.remove(&user_id);
        if let Some(sid) = &removed {
            t.drop_reverse_if_stale(sid);
        }
        Ok(removed)
    }

    async fn unbind_session(&self, user_id: i64, session_id: &str) -> ChatResult<bool> {
        let mut t = self.tables.lock();
        if t.uid_to_session.get(&user_id).map(String::as_str) != Some(session_id) {
            t.drop_reverse_if_stale(session_id);
            return Ok(false);
        }
        t.uid_to_session.remove(&user_id);
        t.session_to_uid.remove(session_id);
        Ok(true)
    }

    async fn lookup_session_for_user(&self, user_id: i64) -> ChatResult<Option<String>> {
        let t = self.tables.lock();
        Ok(t
            .uid_to_session
            .get(&user_id)
            .filter(|sid| t.agrees(user_id, sid))
            .cloned())
    }

    async fn lookup_user_for_session(&self, session_id: &str) -> ChatResult<Option<i64>> {
        let t = self.tables.lock();
        Ok(t
            .session_to_uid
            .get(session_id)
            .copied()
            .filter(|uid| t.agrees(*uid, session_id)))
    }
}
