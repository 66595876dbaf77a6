use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::error;

use super::{ChatRecordStore, RecordQuery};
use crate::domain::{
    ChatRecord, CodePayload, FilePayload, ForwardPayload, InvitePayload, MessageBody, MsgType,
    NewChatRecord, PreviewItem, Source,
};
use crate::error::{ChatError, ChatResult};

const RECORD_COLUMNS: &str =
    "r.id, r.source, r.msg_type, r.user_id, r.receive_id, r.content, r.is_revoke, r.created_at";

/// 每个会话最新一条：私聊按对方分区，群聊按群分区 / Newest row per conversation
const HEADS_SQL: &str = "SELECT r.id, r.source, r.msg_type, r.user_id, r.receive_id, r.content, \
            r.is_revoke, r.created_at \
     FROM ( \
        SELECT c.*, ROW_NUMBER() OVER ( \
            PARTITION BY c.source, \
                CASE WHEN c.source = 2 THEN c.receive_id \
                     WHEN c.user_id = $1 THEN c.receive_id ELSE c.user_id END \
            ORDER BY c.id DESC) AS rn \
        FROM chat_records c \
        WHERE ((c.source = 1 AND (c.user_id = $1 OR c.receive_id = $1)) \
               OR (c.source = 2 AND c.receive_id = ANY($2))) \
          AND NOT EXISTS (SELECT 1 FROM chat_records_delete d \
                          WHERE d.record_id = c.id AND d.user_id = $1) \
     ) r \
     WHERE r.rn = 1 \
     ORDER BY r.id DESC";

#[derive(FromRow)]
struct RecordRow {
    id: i64,
    source: i16,
    msg_type: i16,
    user_id: i64,
    receive_id: i64,
    content: Option<String>,
    is_revoke: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for ChatRecord {
    type Error = ChatError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(ChatRecord {
            id: row.id,
            source: Source::try_from(row.source)?,
            msg_type: MsgType::try_from(row.msg_type)?,
            sender_id: row.user_id,
            receive_id: row.receive_id,
            content: row.content,
            is_revoke: row.is_revoke,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct FileRow {
    record_id: i64,
    user_id: i64,
    file_source: i16,
    file_type: i16,
    save_type: i16,
    original_name: String,
    file_suffix: String,
    file_size: i64,
    save_dir: String,
}

fn into_records(rows: Vec<RecordRow>) -> ChatResult<Vec<ChatRecord>> {
    rows.into_iter().map(ChatRecord::try_from).collect()
}

/// `LIKE` 通配符转义 / Escape `%`, `_` and `\` for a substring match
fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Postgres 聊天记录存储 / Chat Record Store over PostgreSQL
#[derive(Clone)]
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub async fn connect(url: &str, max_connections: u32) -> ChatResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行内置迁移 / Apply the bundled migrations
    pub async fn migrate(&self) -> ChatResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        new: NewChatRecord,
    ) -> ChatResult<i64> {
        let msg_type = i16::from(new.body.msg_type());
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO chat_records (source, msg_type, user_id, receive_id, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(i16::from(new.source))
        .bind(msg_type)
        .bind(new.sender_id)
        .bind(new.receive_id)
        .bind(new.body.content())
        .bind(new.created_at)
        .fetch_one(&mut **tx)
        .await?;

        match new.body {
            MessageBody::Text(_) => {}
            MessageBody::File(file) => {
                sqlx::query(
                    "INSERT INTO chat_records_file \
                     (record_id, user_id, file_source, file_type, save_type, original_name, \
                      file_suffix, file_size, save_dir, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                )
                .bind(id)
                .bind(file.user_id)
                .bind(file.file_source)
                .bind(file.file_type)
                .bind(file.save_type)
                .bind(file.original_name)
                .bind(file.suffix)
                .bind(file.size)
                .bind(file.save_dir)
                .bind(new.created_at)
                .execute(&mut **tx)
                .await?;
            }
            MessageBody::Code(code) => {
                sqlx::query(
                    "INSERT INTO chat_records_code \
                     (record_id, user_id, code_lang, code, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(id)
                .bind(code.user_id)
                .bind(code.lang)
                .bind(code.code)
                .bind(new.created_at)
                .execute(&mut **tx)
                .await?;
            }
            MessageBody::Forward(forward) => {
                sqlx::query(
                    "INSERT INTO chat_records_forward \
                     (record_id, user_id, records_id, preview, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(id)
                .bind(forward.user_id)
                .bind(forward.record_ids)
                .bind(Json(forward.preview))
                .bind(new.created_at)
                .execute(&mut **tx)
                .await?;
            }
            MessageBody::Invite(invite) => {
                sqlx::query(
                    "INSERT INTO chat_records_invite \
                     (record_id, invite_type, operate_user_id, user_ids) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(id)
                .bind(i16::from(invite.invite_type))
                .bind(invite.operator_id)
                .bind(invite.user_ids)
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(id)
    }

    fn push_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &'a RecordQuery) {
        let conversation = query.conversation;
        qb.push(" WHERE r.source = ").push_bind(i16::from(conversation.source));
        match conversation.source {
            Source::Direct => {
                qb.push(" AND ((r.user_id = ")
                    .push_bind(query.viewer)
                    .push(" AND r.receive_id = ")
                    .push_bind(conversation.receive_id)
                    .push(") OR (r.user_id = ")
                    .push_bind(conversation.receive_id)
                    .push(" AND r.receive_id = ")
                    .push_bind(query.viewer)
                    .push("))");
            }
            Source::Group => {
                qb.push(" AND r.receive_id = ").push_bind(conversation.receive_id);
            }
        }
        qb.push(" AND NOT EXISTS (SELECT 1 FROM chat_records_delete d ")
            .push("WHERE d.record_id = r.id AND d.user_id = ")
            .push_bind(query.viewer)
            .push(")");
        if let Some(before) = query.before_id {
            qb.push(" AND r.id < ").push_bind(before);
        }
        if !query.msg_types.is_empty() {
            let types: Vec<i16> = query.msg_types.iter().map(|t| i16::from(*t)).collect();
            qb.push(" AND r.msg_type = ANY(").push_bind(types).push(")");
        }
        if let Some(keyword) = query.keyword.as_deref().filter(|k| !k.is_empty()) {
            qb.push(" AND r.content LIKE ")
                .push_bind(like_pattern(keyword))
                .push(" ESCAPE '\\'");
        }
        if let Some(date) = query.date {
            qb.push(" AND (r.created_at AT TIME ZONE 'UTC')::date = ").push_bind(date);
        }
    }
}

#[async_trait]
impl ChatRecordStore for PgChatStore {
    async fn insert(&self, record: NewChatRecord) -> ChatResult<i64> {
        let mut tx = self.pool.begin().await?;
        let id = Self::insert_in(&mut tx, record).await?;
        tx.commit().await.map_err(|e| {
            error!("提交聊天记录失败 / commit failed: {}", e);
            ChatError::from(e)
        })?;
        Ok(id)
    }

    async fn insert_batch(&self, records: Vec<NewChatRecord>) -> ChatResult<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            // 出错时 tx 被丢弃即回滚 / dropping tx on error rolls back
            ids.push(Self::insert_in(&mut tx, record).await?);
        }
        tx.commit().await.map_err(|e| {
            error!("批量写入提交失败 / batch commit failed: {}", e);
            ChatError::from(e)
        })?;
        Ok(ids)
    }

    async fn find(&self, id: i64) -> ChatResult<Option<ChatRecord>> {
        let sql = format!("SELECT {} FROM chat_records r WHERE r.id = $1", RECORD_COLUMNS);
        let row: Option<RecordRow> =
            sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(ChatRecord::try_from).transpose()
    }

    async fn find_many(&self, ids: &[i64]) -> ChatResult<Vec<ChatRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {} FROM chat_records r WHERE r.id = ANY($1)", RECORD_COLUMNS);
        let rows: Vec<RecordRow> = sqlx::query_as(&sql).bind(ids).fetch_all(&self.pool).await?;
        into_records(rows)
    }

    async fn load_payloads(
        &self,
        msg_type: MsgType,
        ids: &[i64],
    ) -> ChatResult<HashMap<i64, MessageBody>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut out = HashMap::with_capacity(ids.len());
        match msg_type {
            MsgType::Text => {}
            MsgType::File => {
                let rows: Vec<FileRow> = sqlx::query_as(
                    "SELECT record_id, user_id, file_source, file_type, save_type, original_name, \
                            file_suffix, file_size, save_dir \
                     FROM chat_records_file WHERE record_id = ANY($1)",
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
                for row in rows {
                    out.insert(
                        row.record_id,
                        MessageBody::File(FilePayload {
                            user_id: row.user_id,
                            file_source: row.file_source,
                            file_type: row.file_type,
                            save_type: row.save_type,
                            original_name: row.original_name,
                            suffix: row.file_suffix,
                            size: row.file_size,
                            save_dir: row.save_dir,
                        }),
                    );
                }
            }
            MsgType::Code => {
                let rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
                    "SELECT record_id, user_id, code_lang, code \
                     FROM chat_records_code WHERE record_id = ANY($1)",
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
                for (record_id, user_id, lang, code) in rows {
                    out.insert(record_id, MessageBody::Code(CodePayload { user_id, lang, code }));
                }
            }
            MsgType::Forward => {
                let rows: Vec<(i64, i64, Vec<i64>, Json<Vec<PreviewItem>>)> = sqlx::query_as(
                    "SELECT record_id, user_id, records_id, preview \
                     FROM chat_records_forward WHERE record_id = ANY($1)",
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
                for (record_id, user_id, record_ids, Json(preview)) in rows {
                    let forward = ForwardPayload { user_id, record_ids, preview };
                    out.insert(record_id, MessageBody::Forward(forward));
                }
            }
            MsgType::Invite => {
                let rows: Vec<(i64, i16, i64, Vec<i64>)> = sqlx::query_as(
                    "SELECT record_id, invite_type, operate_user_id, user_ids \
                     FROM chat_records_invite WHERE record_id = ANY($1)",
                )
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
                for (record_id, invite_type, operator_id, user_ids) in rows {
                    out.insert(
                        record_id,
                        MessageBody::Invite(InvitePayload {
                            operator_id,
                            invite_type: invite_type.try_into()?,
                            user_ids,
                        }),
                    );
                }
            }
        }
        Ok(out)
    }

    async fn mark_revoked(&self, id: i64) -> ChatResult<ChatRecord> {
        let row: Option<RecordRow> = sqlx::query_as(
            "UPDATE chat_records SET is_revoke = TRUE WHERE id = $1 \
             RETURNING id, source, msg_type, user_id, receive_id, content, is_revoke, created_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ChatRecord::try_from).transpose()?.ok_or(ChatError::NotFound)
    }

    async fn query(&self, query: &RecordQuery) -> ChatResult<Vec<ChatRecord>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM chat_records r", RECORD_COLUMNS));
        Self::push_filter(&mut qb, query);
        qb.push(" ORDER BY r.id DESC LIMIT ")
            .push_bind(query.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);
        let rows: Vec<RecordRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        into_records(rows)
    }

    async fn count(&self, query: &RecordQuery) -> ChatResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM chat_records r");
        Self::push_filter(&mut qb, query);
        let (total,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }

    async fn insert_deletions(&self, user_id: i64, record_ids: &[i64]) -> ChatResult<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO chat_records_delete (record_id, user_id) \
             SELECT UNNEST($1::BIGINT[]), $2 ON CONFLICT DO NOTHING",
        )
        .bind(record_ids)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn conversation_heads(
        &self,
        viewer: i64,
        group_ids: &[i64],
    ) -> ChatResult<Vec<ChatRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(HEADS_SQL)
            .bind(viewer)
            .bind(group_ids)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn mark_read(&self, viewer: i64, peer: i64, up_to_id: i64) -> ChatResult<()> {
        sqlx::query(
            "INSERT INTO chat_read_cursor (user_id, peer_id, last_read_id) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, peer_id) DO UPDATE \
             SET last_read_id = GREATEST(chat_read_cursor.last_read_id, EXCLUDED.last_read_id)",
        )
        .bind(viewer)
        .bind(peer)
        .bind(up_to_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unread_count(&self, viewer: i64, peer: i64) -> ChatResult<i64> {
        let (unread,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_records r \
             WHERE r.source = 1 AND r.user_id = $2 AND r.receive_id = $1 AND r.is_revoke = FALSE \
               AND r.id > COALESCE((SELECT last_read_id FROM chat_read_cursor \
                                    WHERE user_id = $1 AND peer_id = $2), 0) \
               AND NOT EXISTS (SELECT 1 FROM chat_records_delete d \
                               WHERE d.record_id = r.id AND d.user_id = $1)",
        )
        .bind(viewer)
        .bind(peer)
        .fetch_one(&self.pool)
        .await?;
        Ok(unread)
    }

    async fn ping(&self) -> ChatResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
