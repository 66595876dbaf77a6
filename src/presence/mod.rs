//! 在线状态存储 / Presence Store
//!
//! 两个互逆映射：`uid -> session` 与 `session -> uid`。所有多键写入都在后端内
//! 作为一个原子单元完成；读取时校验两个方向一致，不一致视为不存在，
//! 并在下一次 bind/unbind 时被修正。

use async_trait::async_trait;

use crate::error::ChatResult;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory::MemoryPresenceStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisPresenceStore;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 绑定用户与会话，返回被替换的旧会话ID / Bind atomically, returning the replaced session id
    ///
    /// 旧会话的正反向条目与新条目在同一原子单元内更新。若旧会话与新会话相同则返回 `None`。
    async fn bind(&self, user_id: i64, session_id: &str) -> ChatResult<Option<String>>;

    /// 解除用户的绑定，返回被移除的会话ID / Remove the user's binding
    async fn unbind(&self, user_id: i64) -> ChatResult<Option<String>>;

    /// 仅当用户当前绑定的正是该会话时解除（比较并删除）
    /// Compare-and-delete: unbind only if `session_id` is still the user's session
    async fn unbind_session(&self, user_id: i64, session_id: &str) -> ChatResult<bool>;

    async fn lookup_session_for_user(&self, user_id: i64) -> ChatResult<Option<String>>;

    async fn lookup_user_for_session(&self, session_id: &str) -> ChatResult<Option<i64>>;
}
