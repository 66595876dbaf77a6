use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::PresenceStore;
use crate::error::{ChatError, ChatResult};

// KEYS[1] = uid -> sid 哈希, KEYS[2] = sid -> uid 哈希
// 反向条目的持有者不再指回该会话时视为残留并删除

const BIND_LUA: &str = r#"
local prev = redis.call('HGET', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
if prev then
  local holder = redis.call('HGET', KEYS[2], prev)
  if holder and redis.call('HGET', KEYS[1], holder) ~= prev then
    redis.call('HDEL', KEYS[2], prev)
  end
end
local other = redis.call('HGET', KEYS[2], ARGV[2])
if other and other ~= ARGV[1] and redis.call('HGET', KEYS[1], other) == ARGV[2] then
  redis.call('HDEL', KEYS[1], other)
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('HSET', KEYS[2], ARGV[2], ARGV[1])
if prev == ARGV[2] then
  return false
end
return prev
"#;

const UNBIND_LUA: &str = r#"
local sid = redis.call('HGET', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
if sid and redis.call('HGET', KEYS[2], sid) == ARGV[1] then
  redis.call('HDEL', KEYS[2], sid)
end
return sid
"#;

const UNBIND_SESSION_LUA: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then
  if redis.call('HGET', KEYS[2], ARGV[2]) == ARGV[1] then
    redis.call('HDEL', KEYS[2], ARGV[2])
  end
  return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[2])
return 1
"#;

const LOOKUP_SESSION_LUA: &str = r#"
local sid = redis.call('HGET', KEYS[1], ARGV[1])
if sid and redis.call('HGET', KEYS[2], sid) == ARGV[1] then
  return sid
end
return false
"#;

const LOOKUP_USER_LUA: &str = r#"
local uid = redis.call('HGET', KEYS[2], ARGV[1])
if uid and redis.call('HGET', KEYS[1], uid) == ARGV[1] then
  return uid
end
return false
"#;

/// Redis 在线状态存储 / Presence store on two Redis hashes
///
/// 每个操作是一段 Lua 脚本，在服务端原子执行，不存在正反向映射不一致的中间窗口。
#[derive(Clone)]
pub struct RedisPresenceStore {
    manager: ConnectionManager,
    uid_key: String,
    sid_key: String,
    bind_script: Script,
    unbind_script: Script,
    unbind_session_script: Script,
    lookup_session_script: Script,
    lookup_user_script: Script,
}

impl RedisPresenceStore {
    pub async fn connect(redis_url: &str, uid_key: &str, sid_key: &str) -> ChatResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        tracing::info!(
            "presence store connected to redis, uid_key={} sid_key={}",
            uid_key,
            sid_key
        );
        Ok(Self {
            manager,
            uid_key: uid_key.to_string(),
            sid_key: sid_key.to_string(),
            bind_script: Script::new(BIND_LUA),
            unbind_script: Script::new(UNBIND_LUA),
            unbind_session_script: Script::new(UNBIND_SESSION_LUA),
            lookup_session_script: Script::new(LOOKUP_SESSION_LUA),
            lookup_user_script: Script::new(LOOKUP_USER_LUA),
        })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn bind(&self, user_id: i64, session_id: &str) -> ChatResult<Option<String>> {
        let mut conn = self.manager.clone();
        let previous: Option<String> = self
            .bind_script
            .key(&self.uid_key)
            .key(&self.sid_key)
            .arg(user_id)
            .arg(session_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(previous)
    }

    async fn unbind(&self, user_id: i64) -> ChatResult<Option<String>> {
        let mut conn = self.manager.clone();
        let removed: Option<String> = self
            .unbind_script
            .key(&self.uid_key)
            .key(&self.sid_key)
            .arg(user_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn unbind_session(&self, user_id: i64, session_id: &str) -> ChatResult<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = self
            .unbind_session_script
            .key(&self.uid_key)
            .key(&self.sid_key)
            .arg(user_id)
            .arg(session_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn lookup_session_for_user(&self, user_id: i64) -> ChatResult<Option<String>> {
        let mut conn = self.manager.clone();
        let sid: Option<String> = self
            .lookup_session_script
            .key(&self.uid_key)
            .key(&self.sid_key)
            .arg(user_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(sid)
    }

    async fn lookup_user_for_session(&self, session_id: &str) -> ChatResult<Option<i64>> {
        let mut conn = self.manager.clone();
        let uid: Option<String> = self
            .lookup_user_script
            .key(&self.uid_key)
            .key(&self.sid_key)
            .arg(session_id)
            .invoke_async(&mut conn)
            .await?;
        uid.map(|raw| {
            raw.parse::<i64>().map_err(|e| {
                ChatError::storage(format!("bad uid '{}' in presence table: {}", raw, e))
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// 需要真实 Redis：设置 `TALK_TEST_REDIS_URL` 时才运行，每个用例使用独立的键
    /// Needs a live server; runs only when TALK_TEST_REDIS_URL is set, with per-test keys
    async fn store() -> Option<RedisPresenceStore> {
        let url = std::env::var("TALK_TEST_REDIS_URL").ok()?;
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let store = RedisPresenceStore::connect(
            &url,
            &format!("test.{}.uid_sid", tag),
            &format!("test.{}.sid_uid", tag),
        )
        .await
        .unwrap();
        Some(store)
    }

    async fn cleanup(store: &RedisPresenceStore) {
        let mut conn = store.manager.clone();
        let _: () = redis::cmd("DEL")
            .arg(&store.uid_key)
            .arg(&store.sid_key)
            .query_async(&mut conn)
            .await
            .unwrap();
    }

    async fn hset(store: &RedisPresenceStore, key: &str, field: &str, value: &str) {
        let mut conn = store.manager.clone();
        let _: () = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await
            .unwrap();
    }

    async fn hget(store: &RedisPresenceStore, key: &str, field: &str) -> Option<String> {
        let mut conn = store.manager.clone();
        redis::cmd("HGET").arg(key).arg(field).query_async(&mut conn).await.unwrap()
    }

    #[tokio::test]
    async fn bind_returns_previous_session_and_clears_reverse_entry() {
        let Some(store) = store().await else {
            return;
        };
        assert_eq!(store.bind(1, "s1").await.unwrap(), None);
        assert_eq!(store.bind(1, "s2").await.unwrap(), Some("s1".to_string()));
        assert_eq!(store.lookup_user_for_session("s1").await.unwrap(), None);
        assert_eq!(hget(&store, &store.sid_key, "s1").await, None);
        assert_eq!(store.lookup_user_for_session("s2").await.unwrap(), Some(1));
        assert_eq!(store.lookup_session_for_user(1).await.unwrap(), Some("s2".to_string()));
        assert_eq!(store.bind(1, "s2").await.unwrap(), None);
        cleanup(&store).await;
    }

    #[tokio::test]
    async fn unbind_session_only_removes_matching_binding() {
        let Some(store) = store().await else {
            return;
        };
        store.bind(1, "s1").await.unwrap();
        store.bind(1, "s2").await.unwrap();
        assert!(!store.unbind_session(1, "s1").await.unwrap());
        assert_eq!(store.lookup_session_for_user(1).await.unwrap(), Some("s2".to_string()));
        assert!(store.unbind_session(1, "s2").await.unwrap());
        assert_eq!(hget(&store, &store.uid_key, "1").await, None);
        assert_eq!(hget(&store, &store.sid_key, "s2").await, None);
        assert_eq!(store.unbind(1).await.unwrap(), None);

        store.bind(3, "s7").await.unwrap();
        assert_eq!(store.unbind(3).await.unwrap(), Some("s7".to_string()));
        assert_eq!(store.lookup_user_for_session("s7").await.unwrap(), None);
        cleanup(&store).await;
    }

    #[tokio::test]
    async fn disagreeing_entries_are_hidden_and_healed_on_bind() {
        let Some(store) = store().await else {
            return;
        };
        hset(&store, &store.uid_key, "1", "s1").await;
        hset(&store, &store.sid_key, "s1", "2").await;
        assert_eq!(store.lookup_session_for_user(1).await.unwrap(), None);
        assert_eq!(store.lookup_user_for_session("s1").await.unwrap(), None);

        store.bind(2, "s9").await.unwrap();
        store.bind(1, "s3").await.unwrap();
        assert_eq!(hget(&store, &store.sid_key, "s1").await, None);
        assert_eq!(store.lookup_user_for_session("s3").await.unwrap(), Some(1));
        assert_eq!(store.lookup_user_for_session("s9").await.unwrap(), Some(2));
        cleanup(&store).await;
    }

    #[tokio::test]
    async fn session_taken_over_by_another_user_drops_the_old_forward_entry() {
        let Some(store) = store().await else {
            return;
        };
        store.bind(1, "shared").await.unwrap();
        store.bind(2, "shared").await.unwrap();
        assert_eq!(store.lookup_session_for_user(1).await.unwrap(), None);
        assert_eq!(hget(&store, &store.uid_key, "1").await, None);
        assert_eq!(store.lookup_user_for_session("shared").await.unwrap(), Some(2));
        cleanup(&store).await;
    }

    #[tokio::test]
    async fn concurrent_binds_leave_exactly_one_binding() {
        let Some(store) = store().await else {
            return;
        };
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let session = format!("s{}", i);
            handles.push(tokio::spawn(async move { store.bind(7, &session).await.unwrap() }));
        }
        let mut evicted = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                evicted += 1;
            }
        }
        assert_eq!(evicted, 31);
        let sid = store.lookup_session_for_user(7).await.unwrap().unwrap();
        assert_eq!(store.lookup_user_for_session(&sid).await.unwrap(), Some(7));
        cleanup(&store).await;
    }
}
