use async_trait::async_trait;

use crate::SyncResult;

/// 滑动窗口限流器
///
/// 每个键维护窗口 `[now - window, now]` 内被接受的请求数。计数已达上限时返回
/// `true` 且不记录本次请求；否则记录时间戳并返回 `false`。过期条目在下一次检查
/// 同一个键时惰性清理。
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 检查并记录一次请求
    async fn is_limited(&self, key: &str) -> bool;

    /// 清理已经完全过期的键，返回清理数量
    async fn prune_expired(&self) -> SyncResult<u64> {
        Ok(0)
    }

    /// 限流器名称，用于日志和指标
    fn name(&self) -> &str;
}
