use thiserror::Error;

pub type ChatResult<T> = std::result::Result<T, ChatError>;

/// 统一的业务错误类型 / Unified error for presence and message operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("非法操作 / caller is not allowed to access this conversation")]
    Unauthorized,

    #[error("记录不存在 / record not found")]
    NotFound,

    #[error("参数错误 / invalid argument: {0}")]
    InvalidArgument(String),

    #[error("已超过有效的撤回时间 / revoke window expired")]
    RevokeWindowExpired,

    #[error("存储失败 / storage failure: {0}")]
    StorageFailure(String),
}

impl ChatError {
    pub fn invalid<T: Into<String>>(message: T) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn storage<T: std::fmt::Display>(err: T) -> Self {
        Self::StorageFailure(err.to_string())
    }

    /// 错误代码，随 `error` 事件下发给客户端 / Code sent to clients with the `error` event
    pub fn code(&self) -> i32 {
        match self {
            ChatError::Unauthorized => 403,
            ChatError::NotFound => 404,
            ChatError::InvalidArgument(_) => 400,
            ChatError::RevokeWindowExpired => 409,
            ChatError::StorageFailure(_) => 500,
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ChatError::NotFound,
            other => ChatError::storage(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ChatError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ChatError::storage(err)
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        ChatError::storage(err)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::storage(err)
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::storage(err)
    }
}
