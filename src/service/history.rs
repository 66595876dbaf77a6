use chrono::NaiveDate;
use std::sync::Arc;

use crate::domain::{Conversation, MsgType, Page, RecordView};
use crate::error::{ChatError, ChatResult};
use crate::service::authorize::{self, Access, Policy};
use crate::service::pipeline::MessagePipeline;
use crate::storage::RecordQuery;

/// 搜索参数 / Search parameters
#[derive(Clone, Debug)]
pub struct SearchParams {
    pub conversation: Conversation,
    pub keyword: Option<String>,
    pub date: Option<NaiveDate>,
    pub msg_types: Vec<MsgType>,
    /// 从 1 开始 / 1-based
    pub page: u32,
    pub page_size: u32,
}

impl SearchParams {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            keyword: None,
            date: None,
            msg_types: Vec::new(),
            page: 1,
            page_size: 30,
        }
    }
}

/// 历史记录与搜索 / History listing and search over the record store
pub struct HistoryService {
    pipeline: Arc<MessagePipeline>,
    page_limit_max: usize,
}

impl HistoryService {
    pub fn new(pipeline: Arc<MessagePipeline>, page_limit_max: usize) -> Self {
        Self { pipeline, page_limit_max: page_limit_max.max(1) }
    }

    fn clamp(&self, limit: usize) -> usize {
        limit.clamp(1, self.page_limit_max)
    }

    async fn authorize(&self, caller: i64, conversation: &Conversation) -> ChatResult<()> {
        let access = Access::conversation(caller, conversation);
        authorize::check(self.pipeline.graph().as_ref(), Policy::Participant, caller, &access).await
    }

    /// 游标分页，按 id 倒序 / Cursor pagination, newest first; `before_id` 0/None means newest
    pub async fn list_records(
        &self,
        caller: i64,
        conversation: Conversation,
        before_id: Option<i64>,
        limit: usize,
        msg_types: &[MsgType],
    ) -> ChatResult<Vec<RecordView>> {
        self.authorize(caller, &conversation).await?;
        let mut query = RecordQuery::new(caller, conversation);
        query.before_id = before_id.filter(|id| *id > 0);
        query.msg_types = msg_types.to_vec();
        query.limit = self.clamp(limit);

        let records = self.pipeline.store().query(&query).await?;
        self.pipeline.hydrate(records).await
    }

    /// 关键字/日期搜索，返回分页对象 / Keyword and date search with page numbers
    pub async fn search_records(
        &self,
        caller: i64,
        params: SearchParams,
    ) -> ChatResult<Page<RecordView>> {
        if params.page == 0 {
            return Err(ChatError::invalid("page starts at 1"));
        }
        self.authorize(caller, &params.conversation).await?;
        let page_size = self.clamp(params.page_size as usize);

        let mut query = RecordQuery::new(caller, params.conversation);
        query.keyword = params.keyword.filter(|k| !k.trim().is_empty());
        query.date = params.date;
        query.msg_types = params.msg_types;
        query.limit = page_size;
        query.offset = (params.page as usize - 1) * page_size;

        let store = self.pipeline.store();
        let total = store.count(&query).await?;
        let rows = if (query.offset as u64) < total {
            self.pipeline.hydrate(store.query(&query).await?).await?
        } else {
            Vec::new()
        };
        Ok(Page::new(rows, total, params.page, page_size as u32))
    }
}
