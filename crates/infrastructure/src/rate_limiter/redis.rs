use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::warn;
use tradesync_core::config::WindowConfig;
use tradesync_core::traits::RateLimiter;
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

/// 清理过期条目、计数、按需记录，整个过程在 Redis 内原子执行
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
local count = redis.call('ZCARD', key)
if count >= limit then
    return 1
end
redis.call('ZADD', key, now, ARGV[4])
redis.call('PEXPIRE', key, window)
return 0
"#;

/// 基于 Redis 有序集合的共享滑动窗口限流器
pub struct RedisRateLimiter {
    name: String,
    conn: ConnectionManager,
    key_prefix: String,
    window: WindowConfig,
    fail_open: bool,
    script: Script,
}

impl RedisRateLimiter {
    pub fn new(
        name: impl Into<String>,
        conn: ConnectionManager,
        key_prefix: impl Into<String>,
        window: WindowConfig,
        fail_open: bool,
    ) -> Self {
        Self {
            name: name.into(),
            conn,
            key_prefix: key_prefix.into(),
            window,
            fail_open,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    pub async fn check_at(&self, key: &str, now_ms: i64) -> SyncResult<bool> {
        let mut conn = self.conn.clone();
        let limited: i64 = self
            .script
            .key(format!("{}:{key}", self.key_prefix))
            .arg(now_ms)
            .arg(self.window.window_ms)
            .arg(self.window.max_requests)
            .arg(format!("{now_ms}-{}", Uuid::new_v4()))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SyncError::RateLimiterStorage(e.to_string()))?;
        Ok(limited == 1)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_limited(&self, key: &str) -> bool {
        match self.check_at(key, Utc::now().timestamp_millis()).await {
            Ok(true) => {
                super::record_rejection(&self.name);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(
                    limiter = %self.name,
                    key,
                    fail_open = self.fail_open,
                    "限流存储不可用: {e}"
                );
                metrics::counter!(
                    "tradesync_rate_limit_storage_errors_total",
                    "limiter" => self.name.clone()
                )
                .increment(1);
                !self.fail_open
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
