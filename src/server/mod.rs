use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

use crate::collab::{
    BlobStore, EmoticonCatalog, HttpIdentityResolver, IdentityResolver, LocalBlobStore,
    MemorySocialGraph, PgDirectory, SocialGraph, UserDirectory,
};
use crate::config::{AppConfig, DatabaseBackend, PresenceBackend};
use crate::presence::{MemoryPresenceStore, PresenceStore};
use crate::service::{
    Clock, ConnectionManager, HistoryService, MessagePipeline, Notifier, PipelineSettings,
    SystemClock, TalkListService,
};
use crate::storage::{ChatRecordStore, MemoryChatStore, PgChatStore};
use crate::ws::hub::SessionHub;

type Backends = (
    Arc<dyn ChatRecordStore>,
    Arc<dyn SocialGraph>,
    Arc<dyn UserDirectory>,
    Arc<dyn EmoticonCatalog>,
);

/// 可替换的后端组件 / Pluggable backends the core is wired from
#[derive(Clone)]
pub struct Components {
    pub identity: Arc<dyn IdentityResolver>,
    pub presence: Arc<dyn PresenceStore>,
    pub graph: Arc<dyn SocialGraph>,
    pub directory: Arc<dyn UserDirectory>,
    pub store: Arc<dyn ChatRecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub emoticons: Arc<dyn EmoticonCatalog>,
    pub clock: Arc<dyn Clock>,
}

/// 服务端上下文：显式持有所有组件 / Application context passed to every handler
#[derive(Clone)]
pub struct ChatServer {
    pub hub: Arc<SessionHub>,                   // 会话中心 / Session hub
    pub presence: Arc<dyn PresenceStore>,       // 在线状态 / Presence store
    pub store: Arc<dyn ChatRecordStore>,        // 聊天记录 / Record store
    pub notifier: Arc<Notifier>,                // 通知扇出 / Fanout
    pub connections: Arc<ConnectionManager>,    // 连接生命周期 / Lifecycle
    pub pipeline: Arc<MessagePipeline>,         // 消息管道 / Pipeline
    pub history: Arc<HistoryService>,           // 历史与搜索 / History
    pub talks: Arc<TalkListService>,            // 会话列表 / Talk list
}

impl ChatServer {
    pub fn new(components: Components, settings: PipelineSettings, page_limit_max: usize) -> Self {
        let hub = Arc::new(SessionHub::new());
        let notifier = Arc::new(Notifier::new(components.presence.clone(), hub.clone()));
        let connections = Arc::new(ConnectionManager::new(
            components.identity,
            components.presence.clone(),
            components.graph.clone(),
            hub.clone(),
            notifier.clone(),
        ));
        let talks = Arc::new(TalkListService::new(
            components.store.clone(),
            components.graph.clone(),
            components.directory.clone(),
            components.presence.clone(),
        ));
        let pipeline = Arc::new(MessagePipeline::new(
            components.store.clone(),
            components.graph,
            components.directory,
            components.blobs,
            components.emoticons,
            components.clock,
            settings,
        ));
        let history = Arc::new(HistoryService::new(pipeline.clone(), page_limit_max));
        Self {
            hub,
            presence: components.presence,
            store: components.store,
            notifier,
            connections,
            pipeline,
            history,
            talks,
        }
    }

    /// 按配置构建生产组件 / Build components from configuration
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let presence: Arc<dyn PresenceStore> = match cfg.presence.backend {
            PresenceBackend::Memory => Arc::new(MemoryPresenceStore::new()),
            PresenceBackend::Redis => redis_presence(cfg).await?,
        };

        let (store, graph, directory, emoticons): Backends = match cfg.database.backend {
            DatabaseBackend::Postgres => {
                let store =
                    PgChatStore::connect(&cfg.database.url, cfg.database.max_connections).await?;
                store.migrate().await?;
                let directory = Arc::new(PgDirectory::new(store.pool().clone()));
                info!("🗄️ postgres record store ready");
                (Arc::new(store), directory.clone(), directory.clone(), directory)
            }
            DatabaseBackend::Memory => {
                let graph = Arc::new(MemorySocialGraph::new());
                info!("🗄️ in-memory record store ready");
                (Arc::new(MemoryChatStore::new()), graph.clone(), graph.clone(), graph)
            }
        };

        let identity =
            Arc::new(HttpIdentityResolver::new(&cfg.auth.center_url, cfg.auth.timeout_ms)?);
        let components = Components {
            identity,
            presence,
            graph,
            directory,
            store,
            blobs: Arc::new(LocalBlobStore::new(cfg.storage.blob_root.clone())),
            emoticons,
            clock: Arc::new(SystemClock),
        };
        let settings = PipelineSettings {
            revoke_window: Duration::seconds(cfg.talk.revoke_window_secs),
            file_base_url: cfg.storage.file_base_url.clone(),
        };
        Ok(Self::new(components, settings, cfg.talk.page_limit_max))
    }
}

#[cfg(feature = "redis")]
async fn redis_presence(cfg: &AppConfig) -> Result<Arc<dyn PresenceStore>> {
    let store = crate::presence::RedisPresenceStore::connect(
        &cfg.presence.redis_url,
        &cfg.presence.uid_key,
        &cfg.presence.sid_key,
    )
    .await?;
    info!("📡 redis presence store connected");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn redis_presence(_cfg: &AppConfig) -> Result<Arc<dyn PresenceStore>> {
    Err(anyhow::anyhow!("presence.backend = redis requires the `redis` feature"))
}
