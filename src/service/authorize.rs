//! 会话访问控制 / Conversation access predicate
//!
//! 所有操作共用同一个纯函数 `authorize`；外部事实（是否群成员、是否好友）由
//! `load_facts` 预先查询后传入。

use tracing::warn;

use crate::collab::SocialGraph;
use crate::domain::{ChatRecord, Conversation, Source};
use crate::error::{ChatError, ChatResult};

/// 私聊的校验强度 / How strictly a direct conversation is checked
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    /// 调用者是发送方或接收方 / caller is one side of the pair
    Participant,
    /// 在参与者基础上要求双方仍是好友 / participant and still friends
    Friendship,
}

/// 被访问的会话端点 / The addressed pair (or group) being accessed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub source: Source,
    pub sender_id: i64,
    pub receive_id: i64,
}

impl Access {
    pub fn of_record(record: &ChatRecord) -> Self {
        Self { source: record.source, sender_id: record.sender_id, receive_id: record.receive_id }
    }

    /// 调用者视角下的会话 / Conversation as addressed by `caller`
    pub fn conversation(caller: i64, conversation: &Conversation) -> Self {
        Self { source: conversation.source, sender_id: caller, receive_id: conversation.receive_id }
    }

    /// 私聊中的另一方 / The other side of a direct pair
    pub fn peer_of(&self, caller: i64) -> i64 {
        if self.sender_id == caller {
            self.receive_id
        } else {
            self.sender_id
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessFacts {
    pub group_member: bool,
    pub friend: bool,
}

pub fn authorize(
    policy: Policy,
    caller: i64,
    access: &Access,
    facts: &AccessFacts,
) -> ChatResult<()> {
    let allowed = match access.source {
        Source::Group => facts.group_member,
        Source::Direct => {
            let participant = access.sender_id == caller || access.receive_id == caller;
            match policy {
                Policy::Participant => participant,
                Policy::Friendship => participant && facts.friend,
            }
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(ChatError::Unauthorized)
    }
}

/// 只查询判定所需的事实 / Fetch only the facts the policy needs
pub async fn load_facts(
    graph: &dyn SocialGraph,
    policy: Policy,
    caller: i64,
    access: &Access,
) -> ChatResult<AccessFacts> {
    let mut facts = AccessFacts::default();
    match access.source {
        Source::Group => {
            facts.group_member = graph.is_group_member(access.receive_id, caller).await?
        }
        Source::Direct if policy == Policy::Friendship => {
            facts.friend = graph.is_friend(caller, access.peer_of(caller)).await?
        }
        Source::Direct => {}
    }
    Ok(facts)
}

pub async fn check(
    graph: &dyn SocialGraph,
    policy: Policy,
    caller: i64,
    access: &Access,
) -> ChatResult<()> {
    let facts = load_facts(graph, policy, caller, access).await?;
    authorize(policy, caller, access, &facts).inspect_err(|_| {
        warn!(
            "⛔ access denied: caller={} source={:?} sender={} receive={}",
            caller, access.source, access.sender_id, access.receive_id
        )
    })
}
