/// 通用模块：配置与日志
/// Common module: configuration and logging

pub mod config;
pub mod tracing;

pub use self::config::{get_global_config_manager, ConfigManager, ConfigSource};
pub use self::tracing::{init_tracing, LogSettings};
