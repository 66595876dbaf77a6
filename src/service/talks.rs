//! 会话列表 / Conversation list
//!
//! 列表由聊天记录推导：每个会话取最新一条未删除的记录，再补上对方资料、备注、
//! 未读数与在线状态。

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::collab::{SocialGraph, UserDirectory};
use crate::domain::{ChatRecord, Conversation, Source, TalkItem};
use crate::error::ChatResult;
use crate::presence::PresenceStore;
use crate::service::text::talk_summary;
use crate::storage::{ChatRecordStore, RecordQuery};

pub struct TalkListService {
    store: Arc<dyn ChatRecordStore>,
    graph: Arc<dyn SocialGraph>,
    directory: Arc<dyn UserDirectory>,
    presence: Arc<dyn PresenceStore>,
}

/// 私聊记录中 `viewer` 的对方 / The other side of a direct record
fn peer_of(viewer: i64, record: &ChatRecord) -> i64 {
    if record.sender_id == viewer {
        record.receive_id
    } else {
        record.sender_id
    }
}

impl TalkListService {
    pub fn new(
        store: Arc<dyn ChatRecordStore>,
        graph: Arc<dyn SocialGraph>,
        directory: Arc<dyn UserDirectory>,
        presence: Arc<dyn PresenceStore>,
    ) -> Self {
        Self { store, graph, directory, presence }
    }

    /// 用户的会话列表，最近活跃的在前 / Conversations of `user_id`, most recent first
    pub async fn talks(&self, user_id: i64) -> ChatResult<Vec<TalkItem>> {
        let groups = self.graph.groups_of(user_id).await?;
        let heads = self.store.conversation_heads(user_id, &groups).await?;

        let mut peer_ids = HashSet::new();
        let mut group_ids = HashSet::new();
        for head in &heads {
            match head.source {
                Source::Direct => peer_ids.insert(peer_of(user_id, head)),
                Source::Group => group_ids.insert(head.receive_id),
            };
        }
        let peer_ids: Vec<i64> = peer_ids.into_iter().collect();
        let group_ids: Vec<i64> = group_ids.into_iter().collect();
        let profiles = self.directory.profiles(&peer_ids).await?;
        let group_profiles = self.directory.group_profiles(&group_ids).await?;

        let mut items = Vec::with_capacity(heads.len());
        for head in heads {
            let item = match head.source {
                Source::Direct => {
                    let peer = peer_of(user_id, &head);
                    let profile = profiles.get(&peer);
                    TalkItem {
                        source: Source::Direct,
                        friend_id: peer,
                        group_id: 0,
                        name: profile.map(|p| p.nickname.clone()).unwrap_or_default(),
                        avatar: profile.map(|p| p.avatar.clone()).unwrap_or_default(),
                        remark_name: self.graph.remark_of(user_id, peer).await?.unwrap_or_default(),
                        unread_num: self.store.unread_count(user_id, peer).await?,
                        msg_text: talk_summary(&head),
                        last_record_id: head.id,
                        updated_at: head.created_at,
                        online: self.presence.lookup_session_for_user(peer).await?.is_some(),
                    }
                }
                Source::Group => {
                    let profile = group_profiles.get(&head.receive_id);
                    TalkItem {
                        source: Source::Group,
                        friend_id: 0,
                        group_id: head.receive_id,
                        name: profile.map(|g| g.group_name.clone()).unwrap_or_default(),
                        avatar: profile.map(|g| g.avatar.clone()).unwrap_or_default(),
                        remark_name: String::new(),
                        unread_num: 0,
                        msg_text: talk_summary(&head),
                        last_record_id: head.id,
                        updated_at: head.created_at,
                        online: false,
                    }
                }
            };
            items.push(item);
        }
        debug!("talk list for user {}: {} conversations", user_id, items.len());
        Ok(items)
    }

    /// 私聊已读到最新一条 / Mark a direct conversation read up to its newest record
    pub async fn clear_unread(&self, user_id: i64, peer_id: i64) -> ChatResult<()> {
        let mut query = RecordQuery::new(user_id, Conversation::direct(peer_id));
        query.limit = 1;
        if let Some(latest) = self.store.query(&query).await?.first() {
            self.store.mark_read(user_id, peer_id, latest.id).await?;
        }
        Ok(())
    }
}
