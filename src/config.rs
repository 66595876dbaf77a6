use anyhow::Result;
use std::fmt::Display;
use tracing::warn;

use crate::comm::ConfigManager;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub center_url: String,
    pub timeout_ms: u64,
}

/// 在线状态存储后端 / Presence store backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceBackend {
    Memory,
    Redis,
}

#[derive(Clone, Debug)]
pub struct PresenceConfig {
    pub backend: PresenceBackend,
    pub redis_url: String,
    pub uid_key: String,
    pub sid_key: String,
}

/// 聊天记录存储后端 / Chat record store backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseBackend {
    Memory,
    Postgres,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub file_base_url: String,
    pub blob_root: String,
}

/// 消息规则 / Message rules
#[derive(Clone, Debug)]
pub struct TalkConfig {
    pub revoke_window_secs: i64,
    pub page_limit_max: usize,
}

impl Default for TalkConfig {
    fn default() -> Self {
        Self { revoke_window_secs: 120, page_limit_max: 100 }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub presence: PresenceConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub talk: TalkConfig,
}

/// 从全局配置管理器加载 / Load from the global config manager
pub fn load() -> Result<AppConfig> {
    let cm = crate::comm::get_global_config_manager()?;
    Ok(from_manager(&cm))
}

/// 读取整数配置并校验目标类型的范围，越界时回退默认值
/// Integer key narrowed to `T`; out-of-range values fall back to `default`
fn bounded<T>(cm: &ConfigManager, key: &str, default: T) -> T
where
    T: TryFrom<i64> + Copy + Display,
{
    let Ok(raw) = cm.get::<i64>(key) else {
        return default;
    };
    T::try_from(raw).unwrap_or_else(|_| {
        warn!("⚠️ 配置项 {} = {} 超出范围，使用默认值 {} / out of range", key, raw, default);
        default
    })
}

pub fn from_manager(cm: &ConfigManager) -> AppConfig {
    let presence_backend = cm.get_or("presence.backend", "memory".to_string()).to_lowercase();
    let presence_backend = match presence_backend.as_str() {
        "redis" => PresenceBackend::Redis,
        _ => PresenceBackend::Memory,
    };
    let database_backend = cm.get_or("database.backend", "memory".to_string()).to_lowercase();
    let database_backend = match database_backend.as_str() {
        "postgres" | "postgresql" => DatabaseBackend::Postgres,
        _ => DatabaseBackend::Memory,
    };
    AppConfig {
        server: ServerConfig {
            host: cm.get_or("server.host", "127.0.0.1".to_string()),
            ws_port: bounded(cm, "server.ws_port", 9504_u16),
            http_port: bounded(cm, "server.http_port", 9505_u16),
        },
        auth: AuthConfig {
            center_url: cm.get_or("auth.center_url", "http://127.0.0.1:8090".to_string()),
            timeout_ms: bounded(cm, "auth.timeout_ms", 1000_u64),
        },
        presence: PresenceConfig {
            backend: presence_backend,
            redis_url: cm.get_or("presence.redis_url", "redis://127.0.0.1:6379".to_string()),
            uid_key: cm.get_or("presence.uid_key", "hash.socket_user.uid_sid".to_string()),
            sid_key: cm.get_or("presence.sid_key", "hash.socket_user.sid_uid".to_string()),
        },
        database: DatabaseConfig {
            backend: database_backend,
            url: cm.get_or("database.url", "postgres://postgres@127.0.0.1:5432/talk".to_string()),
            max_connections: bounded(cm, "database.max_connections", 10_u32),
        },
        storage: StorageConfig {
            file_base_url: cm
                .get_or("storage.file_base_url", "http://127.0.0.1:9505/files".to_string()),
            blob_root: cm.get_or("storage.blob_root", "data/blobs".to_string()),
        },
        talk: TalkConfig {
            revoke_window_secs: cm.get_or("talk.revoke_window_secs", 120_i64),
            page_limit_max: bounded(cm, "talk.page_limit_max", 100_usize).max(1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ConfigSource;
    use config::FileFormat;

    #[test]
    fn defaults_apply_when_keys_missing() {
        let cm = ConfigManager::with_sources(vec![]).unwrap();
        let cfg = from_manager(&cm);
        assert_eq!(cfg.talk.revoke_window_secs, 120);
        assert_eq!(cfg.presence.uid_key, "hash.socket_user.uid_sid");
    }

    #[test]
    fn backends_are_parsed() {
        let content = "[presence]\nbackend = \"redis\"\n\
                       [database]\nbackend = \"postgres\"\n\
                       [talk]\npage_limit_max = 50\n";
        let cm = ConfigManager::with_sources(vec![ConfigSource::String {
            content: content.to_string(),
            format: FileFormat::Toml,
        }])
        .unwrap();
        let cfg = from_manager(&cm);
        assert_eq!(cfg.presence.backend, PresenceBackend::Redis);
        assert_eq!(cfg.database.backend, DatabaseBackend::Postgres);
        assert_eq!(cfg.talk.page_limit_max, 50);
    }

    #[test]
    fn out_of_range_numbers_fall_back_to_defaults() {
        let content = "[server]\nws_port = 70000\nhttp_port = 9600\n\
                       [database]\nmax_connections = -3\n\
                       [auth]\ntimeout_ms = -1\n[talk]\npage_limit_max = 0\n";
        let cm = ConfigManager::with_sources(vec![ConfigSource::String {
            content: content.to_string(),
            format: FileFormat::Toml,
        }])
        .unwrap();
        let cfg = from_manager(&cm);
        assert_eq!(cfg.server.ws_port, 9504);
        assert_eq!(cfg.server.http_port, 9600);
        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.auth.timeout_ms, 1000);
        assert_eq!(cfg.talk.page_limit_max, 1);
    }
}
