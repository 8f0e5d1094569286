use thiserror::Error;
use uuid::Uuid;

use crate::models::SourceId;

/// 同步引擎错误类型定义
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务队列错误: {0}")]
    JobQueue(String),

    #[error("限流存储错误: {0}")]
    RateLimiterStorage(String),

    #[error("数据源 {source_id} 返回HTTP {status}: {message}")]
    SourceHttp {
        source_id: SourceId,
        status: u16,
        message: String,
    },

    #[error("数据源 {source_id} 不可用: {message}")]
    SourceUnavailable { source_id: SourceId, message: String },

    #[error("数据源未注册: {0}")]
    SourceNotRegistered(SourceId),

    #[error("记录 {external_id} 规范化失败: {message}")]
    Normalization {
        external_id: String,
        message: String,
    },

    #[error("对账错误: {0}")]
    Reconciliation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("请求被限流: {key}")]
    RateLimited { key: String },

    #[error("任务未找到: {id}")]
    JobNotFound { id: Uuid },

    #[error("同步运行未找到: {id}")]
    RunNotFound { id: Uuid },

    #[error("队列未找到: {0}")]
    QueueNotFound(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SyncError {
    /// 是否为瞬时错误（网络、5xx、超时、限流）。
    ///
    /// 仅用于日志分类，重试策略对所有错误一致生效。
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::SourceHttp { status, .. } => *status == 429 || *status >= 500,
            SyncError::SourceUnavailable { .. }
            | SyncError::Timeout(_)
            | SyncError::RateLimited { .. }
            | SyncError::JobQueue(_)
            | SyncError::RateLimiterStorage(_) => true,
            SyncError::Database(_) | SyncError::DatabaseOperation(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SyncResult<T> = std::result::Result<T, SyncError>;
