use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use super::{BlobStore, EmoticonCatalog, IdentityResolver, SocialGraph, UserDirectory};
use crate::domain::{Emoticon, FriendEntry, GroupProfile, UserProfile};
use crate::error::{ChatError, ChatResult};

/// 固定令牌表 / Fixed token -> profile table (development and tests)
#[derive(Default)]
pub struct StaticIdentityResolver {
    tokens: RwLock<HashMap<String, UserProfile>>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: &str, profile: UserProfile) -> Self {
        self.tokens.write().insert(token.to_string(), profile);
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, token: &str) -> ChatResult<UserProfile> {
        self.tokens.read().get(token).cloned().ok_or(ChatError::Unauthorized)
    }
}

#[derive(Default)]
struct GraphTables {
    profiles: HashMap<i64, UserProfile>,
    /// (a, b) -> a 对 b 的备注 / a's remark for b
    friends: HashMap<(i64, i64), String>,
    groups: HashMap<i64, HashSet<i64>>,
    group_profiles: HashMap<i64, GroupProfile>,
    emoticons: HashMap<i64, Emoticon>,
}

/// 内存好友/群关系与用户资料 / In-memory social graph and user directory
#[derive(Default)]
pub struct MemorySocialGraph {
    tables: RwLock<GraphTables>,
}

impl MemorySocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: i64, nickname: &str) -> &Self {
        self.tables.write().profiles.insert(
            user_id,
            UserProfile { user_id, nickname: nickname.to_string(), avatar: String::new() },
        );
        self
    }

    /// 建立双向好友关系 / Make `a` and `b` friends; remarks are what each side calls the other
    pub fn add_friends(&self, a: i64, b: i64, a_calls_b: &str, b_calls_a: &str) -> &Self {
        let mut t = self.tables.write();
        t.friends.insert((a, b), a_calls_b.to_string());
        t.friends.insert((b, a), b_calls_a.to_string());
        self
    }

    pub fn add_member(&self, group_id: i64, user_id: i64) -> &Self {
        self.tables.write().groups.entry(group_id).or_default().insert(user_id);
        self
    }

    pub fn add_group(&self, group_id: i64, group_name: &str) -> &Self {
        self.tables.write().group_profiles.insert(
            group_id,
            GroupProfile { group_id, group_name: group_name.to_string(), avatar: String::new() },
        );
        self
    }

    pub fn add_emoticon(&self, emoticon: Emoticon) -> &Self {
        self.tables.write().emoticons.insert(emoticon.id, emoticon);
        self
    }

    pub fn remove_member(&self, group_id: i64, user_id: i64) -> &Self {
        if let Some(members) = self.tables.write().groups.get_mut(&group_id) {
            members.remove(&user_id);
        }
        self
    }
}

#[async_trait]
impl SocialGraph for MemorySocialGraph {
    async fn friends_of(&self, user_id: i64) -> ChatResult<Vec<FriendEntry>> {
        let t = self.tables.read();
        let mut friends: Vec<FriendEntry> = t
            .friends
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .map(|((_, friend), _)| FriendEntry {
                user_id: *friend,
                // 通知发给好友，备注取好友对当前用户的称呼
                remark: t.friends.get(&(*friend, user_id)).cloned().unwrap_or_default(),
            })
            .collect();
        friends.sort_by_key(|f| f.user_id);
        Ok(friends)
    }

    async fn groups_of(&self, user_id: i64) -> ChatResult<Vec<i64>> {
        let t = self.tables.read();
        let mut groups: Vec<i64> = t
            .groups
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(gid, _)| *gid)
            .collect();
        groups.sort_unstable();
        Ok(groups)
    }

    async fn is_group_member(&self, group_id: i64, user_id: i64) -> ChatResult<bool> {
        Ok(self
            .tables
            .read()
            .groups
            .get(&group_id)
            .map(|m| m.contains(&user_id))
            .unwrap_or(false))
    }

    async fn is_friend(&self, a: i64, b: i64) -> ChatResult<bool> {
        Ok(self.tables.read().friends.contains_key(&(a, b)))
    }

    async fn remark_of(&self, owner: i64, friend: i64) -> ChatResult<Option<String>> {
        Ok(self.tables.read().friends.get(&(owner, friend)).cloned())
    }
}

#[async_trait]
impl UserDirectory for MemorySocialGraph {
    async fn profiles(&self, user_ids: &[i64]) -> ChatResult<HashMap<i64, UserProfile>> {
        let t = self.tables.read();
        Ok(user_ids
            .iter()
            .filter_map(|id| t.profiles.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn group_profiles(&self, group_ids: &[i64]) -> ChatResult<HashMap<i64, GroupProfile>> {
        let t = self.tables.read();
        Ok(group_ids
            .iter()
            .filter_map(|id| t.group_profiles.get(id).map(|g| (*id, g.clone())))
            .collect())
    }
}

#[async_trait]
impl EmoticonCatalog for MemorySocialGraph {
    async fn find_emoticon(&self, emoticon_id: i64) -> ChatResult<Option<Emoticon>> {
        Ok(self.tables.read().emoticons.get(&emoticon_id).cloned())
    }
}

/// 内存文件存储 / In-memory blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.read().get(path).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> ChatResult<()> {
        self.blobs.write().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }
}
