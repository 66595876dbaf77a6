//! 日志初始化 / Tracing subscriber setup
//!
//! 过滤规则来源优先级：`RUST_LOG` > `logging.level`。
//! 连接、握手相关的依赖默认压到 `warn`，本 crate 跟随配置的级别。

use anyhow::Result;
use tracing_log::LogTracer;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{fmt, EnvFilter};

use crate::comm::ConfigManager;

/// 噪声较大的依赖 / Dependencies kept at `warn` unless overridden
const QUIET_TARGETS: [&str; 5] =
    ["sqlx", "tungstenite", "tokio_tungstenite", "actix_server", "redis"];

/// 本地时间，精确到毫秒 / Local wall-clock time with milliseconds
struct LocalMillis;

impl FormatTime for LocalMillis {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        w.write_str(&chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string())
    }
}

/// 日志设置 / Logging settings read from the `[logging]` section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    /// 是否输出事件的 target / print event targets
    pub with_target: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), with_target: false }
    }
}

impl LogSettings {
    pub fn from_manager(cm: &ConfigManager) -> Self {
        let defaults = Self::default();
        Self {
            level: cm.get_or("logging.level", defaults.level),
            with_target: cm.get_or("logging.with_target", defaults.with_target),
        }
    }

    /// 组合过滤指令 / Filter directives for this crate and its noisy dependencies
    ///
    /// `level` 可以是单个级别，也可以已经是完整的指令串（如 `info,v_talk_im=debug`）。
    pub fn directives(&self) -> String {
        let level = self.level.trim();
        let level = if level.is_empty() { "info" } else { level };
        if level.contains('=') {
            return level.to_string();
        }
        let mut directives = vec![level.to_string(), format!("v_talk_im={}", level)];
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
        directives.join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directives()))
            .unwrap_or_else(|_| EnvFilter::new(LogSettings::default().directives()))
    }
}

/// 初始化日志 / Install the global tracing subscriber; repeated calls are no-ops
pub fn init_tracing() -> Result<()> {
    let settings = crate::comm::config::get_global_config_manager()
        .map(|cm| LogSettings::from_manager(&cm))
        .unwrap_or_default();

    LogTracer::init().ok();
    fmt::SubscriberBuilder::default()
        .with_env_filter(settings.filter())
        .with_timer(LocalMillis)
        .compact()
        .with_target(settings.with_target)
        .try_init()
        .ok();
    Ok(())
}
