//! 滑动窗口限流器的两种部署形态
//!
//! - [`InMemoryRateLimiter`] - 进程内，只对单个实例正确，用于热点路径的纵深防御
//! - [`RedisRateLimiter`] - 共享存储，多实例下正确，用于保护对外 API 与出站调用

mod memory;
mod redis;

pub use self::memory::InMemoryRateLimiter;
pub use self::redis::RedisRateLimiter;

use std::sync::Arc;

use ::redis::aio::ConnectionManager;
use tradesync_core::config::{RateLimitBackend, RateLimitConfig, WindowConfig};
use tradesync_core::traits::RateLimiter;
use tradesync_core::{SyncError, SyncResult};

pub(crate) fn record_rejection(limiter: &str) {
    metrics::counter!("tradesync_rate_limit_rejections_total", "limiter" => limiter.to_string())
        .increment(1);
}

/// 按配置构建限流器；选择 Redis 后端却没有连接时返回配置错误
pub fn build_rate_limiter(
    name: &str,
    config: &RateLimitConfig,
    window: WindowConfig,
    redis: Option<ConnectionManager>,
    key_prefix: &str,
) -> SyncResult<Arc<dyn RateLimiter>> {
    match (&config.backend, redis) {
        (RateLimitBackend::Redis, Some(conn)) => Ok(Arc::new(RedisRateLimiter::new(
            name,
            conn,
            format!("{key_prefix}:ratelimit:{name}"),
            window,
            config.fail_open,
        ))),
        (RateLimitBackend::Redis, None) => Err(SyncError::Configuration(format!(
            "限流器 {name} 配置为 Redis 后端，但没有可用的 Redis 连接"
        ))),
        (RateLimitBackend::Memory, _) => Ok(Arc::new(InMemoryRateLimiter::new(name, window))),
    }
}
