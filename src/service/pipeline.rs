//! 消息管道 / Message pipeline
//!
//! 写入：校验 -> 鉴权 -> 记录与附属数据同一事务写入。
//! 读取：按类型分组批量取附属表，再合并回每条记录形成自包含视图。

use chrono::Duration;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::collab::{BlobStore, EmoticonCatalog, SocialGraph, UserDirectory};
use crate::domain::message::{CodeView, FileView, ForwardView, InviteView, UserBrief};
use crate::domain::{
    ChatRecord, CodePayload, Conversation, FilePayload, ForwardPayload, MessageBody, MsgType,
    NewChatRecord, PreviewItem, RecordView, Source, UserProfile,
};
use crate::error::{ChatError, ChatResult};
use crate::service::authorize::{self, Access, Policy};
use crate::service::clock::Clock;
use crate::service::text::{escape_html, preview_text, unescape_html};
use crate::storage::ChatRecordStore;

/// 合并转发摘要条数 / Number of preview lines in a merged forward
pub const PREVIEW_LIMIT: usize = 3;

const IMAGE_SUFFIXES: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];
const VIDEO_SUFFIXES: [&str; 4] = ["mp4", "mov", "avi", "mkv"];

/// 文件来源 / `FilePayload.file_source`
const SOURCE_UPLOAD: i16 = 1;
const SOURCE_EMOTICON: i16 = 2;
const TYPE_IMAGE: i16 = 1;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub revoke_window: Duration,
    /// 文件访问前缀 / Prefix for rendered file URLs
    pub file_base_url: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { revoke_window: Duration::seconds(120), file_base_url: String::new() }
    }
}

pub struct MessagePipeline {
    store: Arc<dyn ChatRecordStore>,
    graph: Arc<dyn SocialGraph>,
    directory: Arc<dyn UserDirectory>,
    blobs: Arc<dyn BlobStore>,
    emoticons: Arc<dyn EmoticonCatalog>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn ChatRecordStore>,
        graph: Arc<dyn SocialGraph>,
        directory: Arc<dyn UserDirectory>,
        blobs: Arc<dyn BlobStore>,
        emoticons: Arc<dyn EmoticonCatalog>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self { store, graph, directory, blobs, emoticons, clock, settings }
    }

    pub fn store(&self) -> &Arc<dyn ChatRecordStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<dyn SocialGraph> {
        &self.graph
    }

    // ------------------------------------------------------------------
    // 写入 / Write path
    // ------------------------------------------------------------------

    /// 创建消息，返回新记录ID / Create a message of any kind
    pub async fn create_message(
        &self,
        caller: i64,
        conversation: Conversation,
        body: MessageBody,
    ) -> ChatResult<i64> {
        let body = validate_body(conversation.source, body)?;
        let access = Access::conversation(caller, &conversation);
        authorize::check(self.graph.as_ref(), Policy::Participant, caller, &access).await?;

        let record = NewChatRecord {
            source: conversation.source,
            sender_id: caller,
            receive_id: conversation.receive_id,
            created_at: self.clock.now(),
            body,
        };
        let msg_type = record.body.msg_type();
        let id = self.store.insert(record).await?;
        debug!(
            "record {} created: type={:?} sender={} receive={}",
            id, msg_type, caller, conversation.receive_id
        );
        Ok(id)
    }

    pub async fn send_text(
        &self,
        caller: i64,
        conversation: Conversation,
        text: &str,
    ) -> ChatResult<i64> {
        self.create_message(caller, conversation, MessageBody::Text(text.to_string())).await
    }

    pub async fn send_code(
        &self,
        caller: i64,
        conversation: Conversation,
        lang: &str,
        code: &str,
    ) -> ChatResult<i64> {
        let payload =
            CodePayload { user_id: caller, lang: lang.to_string(), code: code.to_string() };
        self.create_message(caller, conversation, MessageBody::Code(payload)).await
    }

    /// 发送表情：系统表情或调用者收藏的表情 / Send a shared emoticon or one the caller owns
    pub async fn send_emoticon(
        &self,
        caller: i64,
        conversation: Conversation,
        emoticon_id: i64,
    ) -> ChatResult<i64> {
        let emoticon = self
            .emoticons
            .find_emoticon(emoticon_id)
            .await?
            .filter(|e| e.usable_by(caller))
            .ok_or(ChatError::NotFound)?;
        let original_name = if emoticon.describe.trim().is_empty() {
            "表情".to_string()
        } else {
            emoticon.describe
        };
        let payload = FilePayload {
            user_id: caller,
            file_source: SOURCE_EMOTICON,
            file_type: TYPE_IMAGE,
            save_type: 1,
            original_name,
            suffix: emoticon.suffix,
            size: emoticon.size,
            save_dir: emoticon.url,
        };
        self.create_message(caller, conversation, MessageBody::File(payload)).await
    }

    /// 发送图片：只接受图片后缀 / Upload an image; other suffixes are rejected
    pub async fn send_image(
        &self,
        caller: i64,
        conversation: Conversation,
        original_name: &str,
        bytes: &[u8],
    ) -> ChatResult<i64> {
        let suffix = file_suffix(original_name);
        if file_type_of(&suffix) != TYPE_IMAGE {
            return Err(ChatError::invalid(format!("{} is not an image", original_name)));
        }
        self.send_file(caller, conversation, original_name, bytes).await
    }

    /// 上传文件并创建文件消息 / Store the bytes, then create a file record
    pub async fn send_file(
        &self,
        caller: i64,
        conversation: Conversation,
        original_name: &str,
        bytes: &[u8],
    ) -> ChatResult<i64> {
        if original_name.trim().is_empty() {
            return Err(ChatError::invalid("file name is empty"));
        }
        if bytes.is_empty() {
            return Err(ChatError::invalid("file is empty"));
        }
        let access = Access::conversation(caller, &conversation);
        authorize::check(self.graph.as_ref(), Policy::Participant, caller, &access).await?;

        let suffix = file_suffix(original_name);
        let save_dir = format!(
            "talk/files/{}/{}.{}",
            self.clock.now().format("%Y%m%d"),
            uuid::Uuid::new_v4().simple(),
            if suffix.is_empty() { "bin" } else { suffix.as_str() }
        );
        self.blobs.put(&save_dir, bytes).await?;

        let payload = FilePayload {
            user_id: caller,
            file_source: SOURCE_UPLOAD,
            file_type: file_type_of(&suffix),
            save_type: 1,
            original_name: original_name.to_string(),
            suffix,
            size: bytes.len() as i64,
            save_dir,
        };
        self.create_message(caller, conversation, MessageBody::File(payload)).await
    }

    /// 撤回：不存在 -> 超时 -> 无权限 的顺序校验 / Revoke within the window
    pub async fn revoke_message(&self, caller: i64, record_id: i64) -> ChatResult<ChatRecord> {
        let record = self.store.find(record_id).await?.ok_or(ChatError::NotFound)?;
        if self.clock.now() - record.created_at > self.settings.revoke_window {
            return Err(ChatError::RevokeWindowExpired);
        }
        let access = Access::of_record(&record);
        authorize::check(self.graph.as_ref(), Policy::Participant, caller, &access).await?;
        if record.is_revoke {
            return Ok(record);
        }
        let updated = self.store.mark_revoked(record_id).await?;
        info!("↩️ record {} revoked by user {}", record_id, caller);
        Ok(updated)
    }

    /// 逐条转发：每个目标生成一条同类型新记录，整批原子写入
    /// Forward one record to many targets as a single all-or-nothing batch
    pub async fn forward_message(
        &self,
        caller: i64,
        record_id: i64,
        targets: &[Conversation],
    ) -> ChatResult<Vec<i64>> {
        let record = self.store.find(record_id).await?.ok_or(ChatError::NotFound)?;
        if !record.msg_type.is_forwardable() {
            let reason = format!("{:?} records cannot be forwarded", record.msg_type);
            return Err(ChatError::invalid(reason));
        }
        if record.is_revoke {
            return Err(ChatError::invalid("revoked records cannot be forwarded"));
        }
        let access = Access::of_record(&record);
        authorize::check(self.graph.as_ref(), Policy::Participant, caller, &access).await?;
        self.check_targets(caller, targets).await?;

        let body = match record.msg_type {
            MsgType::Text => MessageBody::Text(record.content.clone().unwrap_or_default()),
            other => self
                .store
                .load_payloads(other, &[record.id])
                .await?
                .remove(&record.id)
                .ok_or_else(|| ChatError::storage(format!("record {} has no payload", record.id)))?,
        };
        let body = reassign_owner(body, caller);

        let now = self.clock.now();
        let batch = targets
            .iter()
            .map(|target| NewChatRecord {
                source: target.source,
                sender_id: caller,
                receive_id: target.receive_id,
                created_at: now,
                body: body.clone(),
            })
            .collect();
        let ids = self.store.insert_batch(batch).await?;
        info!("record {} forwarded by user {} to {} targets", record_id, caller, ids.len());
        Ok(ids)
    }

    /// 合并转发 / Merge several records of one conversation into a forward record per target
    pub async fn merge_forward(
        &self,
        caller: i64,
        conversation: Conversation,
        record_ids: &[i64],
        targets: &[Conversation],
    ) -> ChatResult<Vec<i64>> {
        if record_ids.is_empty() {
            return Err(ChatError::invalid("no records selected"));
        }
        let access = Access::conversation(caller, &conversation);
        authorize::check(self.graph.as_ref(), Policy::Friendship, caller, &access).await?;
        self.check_targets(caller, targets).await?;

        let mut eligible: HashMap<i64, ChatRecord> = self
            .store
            .find_many(record_ids)
            .await?
            .into_iter()
            .filter(|r| {
                r.belongs_to(caller, &conversation) && r.msg_type.is_forwardable() && !r.is_revoke
            })
            .map(|r| (r.id, r))
            .collect();
        // 保持调用方给出的顺序；重复ID在第二次出现时取不到 / request order; a repeated id fails
        let selected: Vec<ChatRecord> =
            record_ids.iter().filter_map(|id| eligible.remove(id)).collect();
        if selected.len() != record_ids.len() {
            return Err(ChatError::invalid(format!(
                "only {} of {} records can be forwarded",
                selected.len(),
                record_ids.len()
            )));
        }

        let preview = self.build_preview(&selected).await?;
        let payload = ForwardPayload { user_id: caller, record_ids: record_ids.to_vec(), preview };

        let now = self.clock.now();
        let batch = targets
            .iter()
            .map(|target| NewChatRecord {
                source: target.source,
                sender_id: caller,
                receive_id: target.receive_id,
                created_at: now,
                body: MessageBody::Forward(payload.clone()),
            })
            .collect();
        let ids = self.store.insert_batch(batch).await?;
        info!(
            "{} records merged by user {} into {} forwards",
            selected.len(),
            caller,
            ids.len()
        );
        Ok(ids)
    }

    async fn build_preview(&self, records: &[ChatRecord]) -> ChatResult<Vec<PreviewItem>> {
        let head = &records[..records.len().min(PREVIEW_LIMIT)];
        let senders: BTreeSet<i64> = head.iter().map(|r| r.sender_id).collect();
        let senders: Vec<i64> = senders.into_iter().collect();
        let profiles = self.directory.profiles(&senders).await?;
        Ok(head
            .iter()
            .map(|r| PreviewItem {
                nickname: profiles
                    .get(&r.sender_id)
                    .map(|p| p.nickname.clone())
                    .unwrap_or_default(),
                text: preview_text(r),
            })
            .collect())
    }

    /// 转发目标校验：群目标要求调用者是成员 / Group targets require membership
    async fn check_targets(&self, caller: i64, targets: &[Conversation]) -> ChatResult<()> {
        if targets.is_empty() {
            return Err(ChatError::invalid("no forward targets"));
        }
        for target in targets {
            if target.source == Source::Group
                && !self.graph.is_group_member(target.receive_id, caller).await?
            {
                return Err(ChatError::Unauthorized);
            }
        }
        Ok(())
    }

    /// 按用户删除（写删除标记），全部校验通过才写入 / Per-user tombstones, all or nothing
    pub async fn delete_records(
        &self,
        caller: i64,
        conversation: Conversation,
        record_ids: &[i64],
    ) -> ChatResult<()> {
        let requested: BTreeSet<i64> = record_ids.iter().copied().collect();
        if requested.is_empty() {
            return Err(ChatError::invalid("no records selected"));
        }
        let access = Access::conversation(caller, &conversation);
        authorize::check(self.graph.as_ref(), Policy::Participant, caller, &access).await?;

        let ids: Vec<i64> = requested.into_iter().collect();
        let verified = self
            .store
            .find_many(&ids)
            .await?
            .iter()
            .filter(|r| r.belongs_to(caller, &conversation))
            .count();
        if verified != ids.len() {
            return Err(ChatError::invalid(format!(
                "only {} of {} records belong to the conversation",
                verified,
                ids.len()
            )));
        }
        self.store.insert_deletions(caller, &ids).await?;
        debug!("user {} deleted {} records", caller, ids.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // 读取 / Read path
    // ------------------------------------------------------------------

    /// 读取单条并组装视图 / Fetch and hydrate one record
    pub async fn view(&self, record_id: i64) -> ChatResult<RecordView> {
        let record = self.store.find(record_id).await?.ok_or(ChatError::NotFound)?;
        self.hydrate(vec![record]).await?.pop().ok_or(ChatError::NotFound)
    }

    /// 展开合并转发记录 / Expand a forward record into its hydrated source records
    pub async fn get_forward_records(
        &self,
        caller: i64,
        record_id: i64,
    ) -> ChatResult<Vec<RecordView>> {
        let record = self.store.find(record_id).await?.ok_or(ChatError::NotFound)?;
        if record.msg_type != MsgType::Forward {
            return Err(ChatError::invalid("not a forward record"));
        }
        let access = Access::of_record(&record);
        authorize::check(self.graph.as_ref(), Policy::Participant, caller, &access).await?;

        let Some(MessageBody::Forward(forward)) =
            self.store.load_payloads(MsgType::Forward, &[record.id]).await?.remove(&record.id)
        else {
            return Ok(Vec::new());
        };
        let mut by_id: HashMap<i64, ChatRecord> = self
            .store
            .find_many(&forward.record_ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let ordered = forward.record_ids.iter().filter_map(|id| by_id.remove(id)).collect();
        self.hydrate(ordered).await
    }

    /// 批量组装视图，保持输入顺序 / Hydrate records, preserving input order
    pub async fn hydrate(&self, records: Vec<ChatRecord>) -> ChatResult<Vec<RecordView>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids_by_type: HashMap<MsgType, Vec<i64>> = HashMap::new();
        for record in &records {
            if record.msg_type != MsgType::Text {
                ids_by_type.entry(record.msg_type).or_default().push(record.id);
            }
        }
        let mut payloads: HashMap<i64, MessageBody> = HashMap::new();
        for (msg_type, ids) in &ids_by_type {
            payloads.extend(self.store.load_payloads(*msg_type, ids).await?);
        }

        let mut user_ids: HashSet<i64> = records.iter().map(|r| r.sender_id).collect();
        for body in payloads.values() {
            if let MessageBody::Invite(invite) = body {
                user_ids.insert(invite.operator_id);
                user_ids.extend(invite.user_ids.iter().copied());
            }
        }
        let user_ids: Vec<i64> = user_ids.into_iter().collect();
        let profiles = self.directory.profiles(&user_ids).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let body = payloads.remove(&record.id);
                self.render(record, body, &profiles)
            })
            .collect())
    }

    fn render(
        &self,
        record: ChatRecord,
        body: Option<MessageBody>,
        profiles: &HashMap<i64, UserProfile>,
    ) -> RecordView {
        let sender = profiles.get(&record.sender_id);
        let mut view = RecordView {
            id: record.id,
            source: record.source,
            msg_type: record.msg_type,
            user_id: record.sender_id,
            receive_id: record.receive_id,
            nickname: sender.map(|p| p.nickname.clone()).unwrap_or_default(),
            avatar: sender.map(|p| p.avatar.clone()).unwrap_or_default(),
            content: record.content.unwrap_or_default(),
            is_revoke: record.is_revoke,
            created_at: record.created_at,
            file: None,
            code_block: None,
            forward: None,
            invite: None,
        };

        match body {
            Some(MessageBody::File(file)) => {
                view.file = Some(FileView {
                    file_url: self.file_url(&file.save_dir),
                    file_source: file.file_source,
                    file_type: file.file_type,
                    save_type: file.save_type,
                    original_name: file.original_name,
                    suffix: file.suffix,
                    size: file.size,
                    save_dir: file.save_dir,
                });
            }
            Some(MessageBody::Code(code)) => {
                view.code_block =
                    Some(CodeView { lang: code.lang, code: unescape_html(&code.code) });
            }
            Some(MessageBody::Forward(forward)) => {
                view.forward =
                    Some(ForwardView { num: forward.record_ids.len(), list: forward.preview });
            }
            Some(MessageBody::Invite(invite)) => {
                let brief = |id: i64| UserBrief {
                    id,
                    nickname: profiles.get(&id).map(|p| p.nickname.clone()).unwrap_or_default(),
                };
                // 退群通知的受影响用户即操作者本人 / a leave notice affects only its operator
                let users = if invite.invite_type.lists_affected_users() {
                    invite.user_ids.iter().map(|id| brief(*id)).collect()
                } else {
                    vec![brief(invite.operator_id)]
                };
                view.invite = Some(InviteView {
                    invite_type: invite.invite_type,
                    operate_user: brief(invite.operator_id),
                    users,
                });
            }
            Some(MessageBody::Text(_)) | None => {}
        }
        view
    }

    fn file_url(&self, save_dir: &str) -> String {
        let base = self.settings.file_base_url.trim_end_matches('/');
        // 表情等外部资源已是完整地址 / emoticons already carry an absolute URL
        if base.is_empty() || save_dir.starts_with("http://") || save_dir.starts_with("https://") {
            save_dir.to_string()
        } else {
            format!("{}/{}", base, save_dir.trim_start_matches('/'))
        }
    }
}

/// 类型相关的写入前校验与规范化 / Per-kind validation; code is stored escaped
fn validate_body(source: Source, body: MessageBody) -> ChatResult<MessageBody> {
    match body {
        MessageBody::Text(text) if text.trim().is_empty() => {
            Err(ChatError::invalid("text is empty"))
        }
        MessageBody::Code(code) if code.lang.trim().is_empty() || code.code.is_empty() => {
            Err(ChatError::invalid("code block needs a language and a body"))
        }
        MessageBody::Code(code) => {
            Ok(MessageBody::Code(CodePayload { code: escape_html(&code.code), ..code }))
        }
        MessageBody::File(file) if file.save_dir.is_empty() || file.original_name.is_empty() => {
            Err(ChatError::invalid("file payload is incomplete"))
        }
        MessageBody::Forward(forward) if forward.record_ids.is_empty() => {
            Err(ChatError::invalid("forward payload lists no records"))
        }
        MessageBody::Invite(_) if source != Source::Group => {
            Err(ChatError::invalid("invite notices are group-only"))
        }
        MessageBody::Invite(invite)
            if invite.invite_type.lists_affected_users() && invite.user_ids.is_empty() =>
        {
            Err(ChatError::invalid("invite notice lists no users"))
        }
        other => Ok(other),
    }
}

/// 代码块转发后归属转发者；文件保留原上传者
/// Code is re-owned by the forwarder, files keep their uploader
fn reassign_owner(body: MessageBody, owner: i64) -> MessageBody {
    match body {
        MessageBody::Code(code) => MessageBody::Code(CodePayload { user_id: owner, ..code }),
        other => other,
    }
}

fn file_suffix(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// 1: 图片 2: 视频 3: 其它 / 1 image, 2 video, 3 other
fn file_type_of(suffix: &str) -> i16 {
    if IMAGE_SUFFIXES.contains(&suffix) {
        1
    } else if VIDEO_SUFFIXES.contains(&suffix) {
        2
    } else {
        3
    }
}
