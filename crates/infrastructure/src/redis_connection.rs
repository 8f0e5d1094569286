use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error};
use tradesync_core::config::RedisConfig;
use tradesync_core::{SyncError, SyncResult};

/// 建立可自动重连的 Redis 连接，并用 PING 验证可用性
pub async fn connect(config: &RedisConfig) -> SyncResult<ConnectionManager> {
    let client = Client::open(config.build_url()).map_err(|e| {
        SyncError::Configuration(format!("创建Redis客户端失败: {e}"))
    })?;

    let timeout = Duration::from_secs(config.connection_timeout_seconds);
    let mut manager = tokio::time::timeout(timeout, client.get_connection_manager())
        .await
        .map_err(|_| SyncError::Timeout(format!("连接Redis超时: {}", config.redacted_url())))?
        .map_err(|e| SyncError::JobQueue(format!("连接Redis失败: {e}")))?;

    let response: String = redis::cmd("PING")
        .query_async(&mut manager)
        .await
        .map_err(|e| SyncError::JobQueue(format!("Redis PING失败: {e}")))?;
    if response != "PONG" {
        let message = format!("意外的PING响应: {response}");
        error!("{}", message);
        return Err(SyncError::JobQueue(message));
    }

    debug!("Redis连接成功: {}", config.redacted_url());
    Ok(manager)
}

/// 健康检查
pub async fn ping(conn: &ConnectionManager) -> bool {
    let mut conn = conn.clone();
    redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .is_ok()
}
