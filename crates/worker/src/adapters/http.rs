use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};
use tradesync_core::config::RateLimitConfig;
use tradesync_core::models::SourceId;
use tradesync_core::traits::RateLimiter;
use tradesync_core::{SyncError, SyncResult};

/// 错误信息中保留的响应体长度
const ERROR_BODY_LIMIT: usize = 200;

/// 出站限流：每次调用外部数据源前获取许可，被限流时小步等待
pub struct OutboundThrottle {
    limiter: Arc<dyn RateLimiter>,
    max_wait: Duration,
    retry_interval: Duration,
}

impl OutboundThrottle {
    pub fn new(limiter: Arc<dyn RateLimiter>, max_wait: Duration, retry_interval: Duration) -> Self {
        Self {
            limiter,
            max_wait,
            retry_interval,
        }
    }

    pub fn from_config(limiter: Arc<dyn RateLimiter>, config: &RateLimitConfig) -> Self {
        Self::new(
            limiter,
            Duration::from_millis(config.outbound_max_wait_ms),
            Duration::from_millis(config.outbound_retry_interval_ms),
        )
    }

    pub fn key_for(source: SourceId) -> String {
        format!("source:{source}")
    }

    /// 等待直到获得许可；超过最长等待时间返回 `RateLimited`
    pub async fn acquire(&self, source: SourceId) -> SyncResult<()> {
        let key = Self::key_for(source);
        let started = Instant::now();
        loop {
            if !self.limiter.is_limited(&key).await {
                return Ok(());
            }
            if started.elapsed() >= self.max_wait {
                warn!(source = %source, waited_ms = started.elapsed().as_millis() as u64, "出站调用等待限流许可超时");
                return Err(SyncError::RateLimited { key });
            }
            debug!(source = %source, "出站调用被限流，等待重试");
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

/// 数据源共享的HTTP客户端
pub struct SourceHttpClient {
    client: reqwest::Client,
    throttle: Arc<OutboundThrottle>,
}

impl SourceHttpClient {
    pub fn new(throttle: Arc<OutboundThrottle>) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tradesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client, throttle })
    }

    /// 受限流保护的 GET 请求，返回解析后的 JSON
    pub async fn get_json(
        &self,
        source: SourceId,
        url: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> SyncResult<Value> {
        self.throttle.acquire(source).await?;

        debug!(source = %source, url, "请求外部数据源");
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unavailable(source, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(SyncError::SourceHttp {
                source_id: source,
                status: status.as_u16(),
                message,
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                SyncError::Serialization(format!("数据源 {source} 返回了无效的JSON: {e}"))
            } else {
                unavailable(source, e)
            }
        })
    }
}

fn unavailable(source: SourceId, err: reqwest::Error) -> SyncError {
    let message = if err.is_timeout() {
        format!("请求超时: {err}")
    } else if err.is_connect() {
        format!("连接失败: {err}")
    } else {
        err.to_string()
    };
    SyncError::SourceUnavailable {
        source_id: source,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradesync_core::config::WindowConfig;
    use tradesync_infrastructure::rate_limiter::InMemoryRateLimiter;

    fn throttle(max_requests: u64, max_wait_ms: u64) -> OutboundThrottle {
        let limiter = Arc::new(InMemoryRateLimiter::new(
            "outbound",
            WindowConfig {
                window_ms: 60_000,
                max_requests,
            },
        ));
        OutboundThrottle::new(
            limiter,
            Duration::from_millis(max_wait_ms),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_acquire_within_budget() {
        let throttle = throttle(2, 50);
        assert!(throttle.acquire(SourceId::FederalRegister).await.is_ok());
        assert!(throttle.acquire(SourceId::FederalRegister).await.is_ok());
        // 不同数据源使用独立的窗口
        assert!(throttle.acquire(SourceId::CustomsRulings).await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_gives_up_after_max_wait() {
        let throttle = throttle(1, 30);
        throttle.acquire(SourceId::TariffSchedule).await.unwrap();

        let err = throttle.acquire(SourceId::TariffSchedule).await.unwrap_err();
        match err {
            SyncError::RateLimited { key } => assert_eq!(key, "source:tariff_schedule"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
