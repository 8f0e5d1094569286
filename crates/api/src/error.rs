use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;
use tradesync_core::SyncError;

use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("同步引擎错误: {0}")]
    Sync(#[from] SyncError),

    #[error("缺少运维凭据")]
    MissingOperatorKey,

    #[error("运维凭据无效")]
    InvalidOperatorKey,

    #[error("请求过于频繁")]
    RateLimited,

    #[error("未找到资源: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Sync(
                SyncError::RunNotFound { .. }
                | SyncError::JobNotFound { .. }
                | SyncError::QueueNotFound(_),
            )
            | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Sync(SyncError::RateLimited { .. }) | ApiError::RateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::MissingOperatorKey | ApiError::InvalidOperatorKey => StatusCode::UNAUTHORIZED,
            ApiError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Sync(SyncError::RunNotFound { id }) => format!("同步运行 {id} 不存在"),
            ApiError::Sync(SyncError::JobNotFound { id }) => format!("任务 {id} 不存在"),
            ApiError::Sync(SyncError::QueueNotFound(name)) => format!("队列 {name} 不存在"),
            ApiError::Sync(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %e, "请求处理失败");
                "系统内部错误".to_string()
            }
            other => other.to_string(),
        };
        (status, ApiResponse::failure(message)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
