use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref GLOBAL_CONFIG_MANAGER: RwLock<Option<Arc<ConfigManager>>> = RwLock::new(None);
}

/// 环境变量前缀 / Environment variable prefix (`TALK_SERVER__WS_PORT=...`)
pub const ENV_PREFIX: &str = "TALK";

/// 配置错误类型 / Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置项 '{key}' 不存在 / key not found")]
    KeyNotFound { key: String },
    #[error("配置项 '{key}' 类型转换失败: {message}")]
    TypeConversionError { key: String, message: String },
    #[error("配置初始化失败: {message}")]
    InitializationError { message: String },
}

/// 配置数据源信息 / Loaded source info
#[derive(Debug, Clone)]
pub struct ConfigSourceInfo {
    pub source_type: String,
    pub description: String,
    pub priority: u8,
    pub loaded: bool,
}

/// 配置管理器 / Layered configuration manager
pub struct ConfigManager {
    config: Config,
    sources_info: Vec<ConfigSourceInfo>,
}

impl ConfigManager {
    /// 使用默认配置源创建 / Create with default sources only
    pub fn new() -> Result<Self> {
        Self::with_sources(vec![])
    }

    /// 使用指定的配置源创建配置管理器
    /// Create with extra sources; later sources win over earlier ones
    pub fn with_sources(sources: Vec<ConfigSource>) -> Result<Self> {
        let mut builder = Config::builder();
        let mut sources_info = Vec::new();

        // 优先级：环境变量 > production.toml > default.toml > development.toml > 额外源之前
        let default_sources = vec![
            ConfigSource::File {
                path: "config/development.toml".to_string(),
                format: Some(FileFormat::Toml),
                required: false,
            },
            ConfigSource::File {
                path: "config/default.toml".to_string(),
                format: Some(FileFormat::Toml),
                required: false,
            },
            ConfigSource::File {
                path: "config/production.toml".to_string(),
                format: Some(FileFormat::Toml),
                required: false,
            },
            ConfigSource::Env {
                prefix: ENV_PREFIX.to_string(),
                separator: "__",
            },
        ];

        let mut priority = 1u8;
        for source in default_sources.into_iter().chain(sources) {
            let info = source.source_info(priority);
            priority = priority.saturating_add(1);

            if let ConfigSource::File { path, required, .. } = &source {
                let exists = std::path::Path::new(path).exists();
                if !exists && *required {
                    return Err(anyhow!(
                        "必需的配置文件不存在 / required config file missing: {}",
                        path
                    ));
                }
                if !exists {
                    sources_info.push(info);
                    continue;
                }
            }

            builder = source
                .add_to_builder(builder)
                .map_err(|e| anyhow!("添加配置源失败 / failed to add source: {}", e))?;
            sources_info.push(ConfigSourceInfo { loaded: true, ..info });
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("构建配置失败 / failed to build config: {}", e))?;
        Ok(Self { config, sources_info })
    }

    /// 获取指定 key 的配置值 / Typed lookup
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config
            .get(key)
            .map_err(|e| anyhow!("获取配置 '{}' 失败: {}", key, e))
    }

    /// 获取配置值，不存在时返回默认值 / Typed lookup with fallback
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// 安全获取配置值 / Lookup with a structured error
    pub fn get_safe<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<T, ConfigError> {
        self.config.get(key).map_err(|e| {
            if e.to_string().contains("not found") {
                ConfigError::KeyNotFound { key: key.to_string() }
            } else {
                ConfigError::TypeConversionError {
                    key: key.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.config.get::<serde_json::Value>(key).is_ok()
    }

    /// 已成功加载的配置源 / Sources that were actually loaded
    pub fn active_sources(&self) -> Vec<&ConfigSourceInfo> {
        self.sources_info.iter().filter(|info| info.loaded).collect()
    }
}

/// 配置源类型 / Configuration source
pub enum ConfigSource {
    File {
        path: String,
        format: Option<FileFormat>,
        required: bool,
    },
    Env {
        prefix: String,
        separator: &'static str,
    },
    /// 内存配置源 / In-memory map, mostly for tests
    Memory(HashMap<String, serde_json::Value>),
    String { content: String, format: FileFormat },
}

impl ConfigSource {
    fn source_info(&self, priority: u8) -> ConfigSourceInfo {
        let (source_type, description) = match self {
            ConfigSource::File { path, required, .. } => {
                ("File", format!("file {} (required: {})", path, required))
            }
            ConfigSource::Env { prefix, separator } => {
                ("Environment", format!("prefix={} separator={}", prefix, separator))
            }
            ConfigSource::Memory(map) => ("Memory", format!("{} entries", map.len())),
            ConfigSource::String { .. } => ("String", "inline content".to_string()),
        };
        ConfigSourceInfo {
            source_type: source_type.to_string(),
            description,
            priority,
            loaded: false,
        }
    }

    fn add_to_builder(
        self,
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ConfigBuilder<config::builder::DefaultState>> {
        match self {
            ConfigSource::File { path, format, required } => {
                let file_source = match format {
                    Some(format) => File::with_name(&path).format(format),
                    None => File::with_name(&path),
                };
                Ok(builder.add_source(file_source.required(required)))
            }
            ConfigSource::Env { prefix, separator } => Ok(builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator(separator)
                    .prefix_separator("_")
                    .ignore_empty(true),
            )),
            ConfigSource::Memory(map) => {
                let json_content = serde_json::to_string(&nest_dotted_keys(map))
                    .map_err(|e| anyhow!("序列化内存配置失败: {}", e))?;
                Ok(builder.add_source(File::from_str(&json_content, FileFormat::Json)))
            }
            ConfigSource::String { content, format } => {
                Ok(builder.add_source(File::from_str(&content, format)))
            }
        }
    }
}

/// `a.b = 1` 展开为 `{ "a": { "b": 1 } }` / Expand dotted keys into nested tables
fn nest_dotted_keys(map: HashMap<String, serde_json::Value>) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for (key, value) in map {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value);
    }
    serde_json::Value::Object(root)
}

fn insert_path(
    target: &mut serde_json::Map<String, serde_json::Value>,
    parts: &[&str],
    value: serde_json::Value,
) {
    match parts {
        [] => {}
        [last] => {
            target.insert(last.to_string(), value);
        }
        [head, rest @ ..] => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !child.is_object() {
                *child = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

/// 安装全局配置管理器 / Install the process-wide manager (e.g. after `--config`)
pub fn install_global_config_manager(manager: ConfigManager) -> Result<Arc<ConfigManager>> {
    let manager = Arc::new(manager);
    let mut slot = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败: {}", e))?;
    *slot = Some(Arc::clone(&manager));
    Ok(manager)
}

/// 获取全局配置管理器实例（单例模式）/ Lazily created global manager
pub fn get_global_config_manager() -> Result<Arc<ConfigManager>> {
    {
        let manager = GLOBAL_CONFIG_MANAGER
            .read()
            .map_err(|e| anyhow!("读取全局配置管理器锁失败: {}", e))?;
        if let Some(ref config_manager) = *manager {
            return Ok(Arc::clone(config_manager));
        }
    }
    let mut manager = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败: {}", e))?;
    match manager.as_ref() {
        Some(existing) => Ok(Arc::clone(existing)),
        None => {
            let config_manager =
                Arc::new(ConfigManager::new().map_err(|e| anyhow!("创建配置管理器失败: {}", e))?);
            *manager = Some(Arc::clone(&config_manager));
            Ok(config_manager)
        }
    }
}
