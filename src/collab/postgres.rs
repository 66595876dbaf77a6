use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

use super::{EmoticonCatalog, SocialGraph, UserDirectory};
use crate::domain::{Emoticon, FriendEntry, GroupProfile, UserProfile};
use crate::error::ChatResult;

/// 基于 Postgres 的好友/群关系与用户资料 / Social graph and directory over the user tables
///
/// 表 `users_friends` 以 `user1 < user2` 存一行，`userN_remark` 为 userN 给对方的备注。
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SocialGraph for PgDirectory {
    async fn friends_of(&self, user_id: i64) -> ChatResult<Vec<FriendEntry>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT CASE WHEN user1 = $1 THEN user2 ELSE user1 END AS friend_id, \
                    COALESCE(CASE WHEN user1 = $1 THEN user2_remark ELSE user1_remark END, '') \
                    AS remark \
             FROM users_friends \
             WHERE (user1 = $1 OR user2 = $1) AND status = 1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, remark)| FriendEntry { user_id, remark })
            .collect())
    }

    async fn groups_of(&self, user_id: i64) -> ChatResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT group_id FROM group_member \
             WHERE user_id = $1 AND is_quit = FALSE ORDER BY group_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(gid,)| gid).collect())
    }

    async fn is_group_member(&self, group_id: i64, user_id: i64) -> ChatResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM group_member \
             WHERE group_id = $1 AND user_id = $2 AND is_quit = FALSE)",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn is_friend(&self, a: i64, b: i64) -> ChatResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM users_friends \
             WHERE user1 = LEAST($1, $2) AND user2 = GREATEST($1, $2) AND status = 1)",
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn remark_of(&self, owner: i64, friend: i64) -> ChatResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT COALESCE(CASE WHEN user1 = $1 THEN user1_remark ELSE user2_remark END, '') \
             FROM users_friends \
             WHERE user1 = LEAST($1, $2) AND user2 = GREATEST($1, $2) AND status = 1",
        )
        .bind(owner)
        .bind(friend)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(remark,)| remark))
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn profiles(&self, user_ids: &[i64]) -> ChatResult<HashMap<i64, UserProfile>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, nickname, COALESCE(avatar, '') FROM users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, nickname, avatar)| (user_id, UserProfile { user_id, nickname, avatar }))
            .collect())
    }

    async fn group_profiles(&self, group_ids: &[i64]) -> ChatResult<HashMap<i64, GroupProfile>> {
        if group_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, group_name, COALESCE(avatar, '') FROM users_group WHERE id = ANY($1)",
        )
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(group_id, group_name, avatar)| {
                (group_id, GroupProfile { group_id, group_name, avatar })
            })
            .collect())
    }
}

#[async_trait]
impl EmoticonCatalog for PgDirectory {
    async fn find_emoticon(&self, emoticon_id: i64) -> ChatResult<Option<Emoticon>> {
        let row: Option<(i64, i64, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, user_id, describe, url, file_suffix, file_size \
             FROM emoticon_details WHERE id = $1",
        )
        .bind(emoticon_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, user_id, describe, url, suffix, size)| Emoticon {
            id,
            user_id,
            describe,
            url,
            suffix,
            size,
        }))
    }
}
