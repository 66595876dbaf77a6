//! 外部协作者契约 / Contracts for collaborators the core calls but does not own
//!
//! 身份解析、好友/群关系、用户资料和文件存储都在核心之外；这里只定义核心依赖的
//! 接口，并提供 HTTP / Postgres / 本地磁盘 / 内存实现。

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::{Emoticon, FriendEntry, GroupProfile, UserProfile};
use crate::error::ChatResult;

pub mod blob;
pub mod http;
pub mod memory;
pub mod postgres;

pub use blob::LocalBlobStore;
pub use http::HttpIdentityResolver;
pub use memory::{MemoryBlobStore, MemorySocialGraph, StaticIdentityResolver};
pub use postgres::PgDirectory;

/// 令牌解析 / Token decoder; fails with `Unauthorized`
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> ChatResult<UserProfile>;
}

/// 好友与群关系（只读）/ Read-only friend and group relations
#[async_trait]
pub trait SocialGraph: Send + Sync {
    async fn friends_of(&self, user_id: i64) -> ChatResult<Vec<FriendEntry>>;
    async fn groups_of(&self, user_id: i64) -> ChatResult<Vec<i64>>;
    async fn is_group_member(&self, group_id: i64, user_id: i64) -> ChatResult<bool>;
    async fn is_friend(&self, a: i64, b: i64) -> ChatResult<bool>;

    /// `owner` 给好友 `friend` 的备注，非好友为 `None` / owner's remark for a friend
    async fn remark_of(&self, owner: i64, friend: i64) -> ChatResult<Option<String>>;
}

/// 用户资料批量查询 / Batch profile lookup for rendering
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profiles(&self, user_ids: &[i64]) -> ChatResult<HashMap<i64, UserProfile>>;

    async fn group_profiles(&self, group_ids: &[i64]) -> ChatResult<HashMap<i64, GroupProfile>>;
}

/// 表情查询 / Emoticon lookup
#[async_trait]
pub trait EmoticonCatalog: Send + Sync {
    async fn find_emoticon(&self, emoticon_id: i64) -> ChatResult<Option<Emoticon>>;
}

/// 文件存储 / Blob store; the path is stored verbatim in `FilePayload.save_dir`
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> ChatResult<()>;
}
