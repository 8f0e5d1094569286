use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tradesync_core::config::WindowConfig;
use tradesync_core::traits::RateLimiter;
use tradesync_core::SyncResult;

/// 进程内滑动窗口限流器
pub struct InMemoryRateLimiter {
    name: String,
    window_ms: i64,
    max_requests: usize,
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl InMemoryRateLimiter {
    pub fn new(name: impl Into<String>, window: WindowConfig) -> Self {
        Self {
            name: name.into(),
            window_ms: window.window_ms as i64,
            max_requests: window.max_requests as usize,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// 以给定时间（毫秒）执行一次检查
    pub async fn check_at(&self, key: &str, now_ms: i64) -> bool {
        let mut windows = self.windows.lock().await;
        let timestamps = windows.entry(key.to_string()).or_default();

        let floor = now_ms - self.window_ms;
        while timestamps.front().is_some_and(|ts| *ts < floor) {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.max_requests {
            super::record_rejection(&self.name);
            return true;
        }

        timestamps.push_back(now_ms);
        false
    }

    /// 删除窗口内已无请求的键
    pub async fn prune_at(&self, now_ms: i64) -> u64 {
        let floor = now_ms - self.window_ms;
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, timestamps| timestamps.back().is_some_and(|ts| *ts >= floor));
        (before - windows.len()) as u64
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn is_limited(&self, key: &str) -> bool {
        self.check_at(key, Utc::now().timestamp_millis()).await
    }

    async fn prune_expired(&self) -> SyncResult<u64> {
        Ok(self.prune_at(Utc::now().timestamp_millis()).await)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(
            "inbound",
            WindowConfig {
                window_ms: 60_000,
                max_requests: 100,
            },
        )
    }

    #[tokio::test]
    async fn test_window_allows_up_to_limit() {
        let limiter = limiter();
        let start = 1_700_000_000_000;

        for i in 0..100 {
            assert!(!limiter.check_at("k", start + i).await, "call {i} limited");
        }
        assert!(limiter.check_at("k", start + 100).await);

        // 被拒绝的请求不计入窗口，窗口滑过后恢复
        assert!(!limiter.check_at("k", start + 60_001 + 99).await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = InMemoryRateLimiter::new(
            "outbound",
            WindowConfig {
                window_ms: 1_000,
                max_requests: 1,
            },
        );
        assert!(!limiter.check_at("source:a", 0).await);
        assert!(limiter.check_at("source:a", 10).await);
        assert!(!limiter.check_at("source:b", 10).await);
    }

    #[tokio::test]
    async fn test_prune_drops_idle_keys() {
        let limiter = limiter();
        limiter.check_at("old", 0).await;
        limiter.check_at("fresh", 100_000).await;

        assert_eq!(limiter.prune_at(100_000).await, 1);
        assert_eq!(limiter.tracked_keys().await, 1);
    }
}
