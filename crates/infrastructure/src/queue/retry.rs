use chrono::{DateTime, Duration, Utc};
use tradesync_core::config::QueueConfig;

/// 重试退避策略
///
/// 第 n 次尝试失败后的等待时间为 `min(base * 2^(n-1), max)`，可选叠加抖动。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base_delay_ms: config.backoff_base_ms,
            max_delay_ms: config.backoff_max_ms,
            jitter_factor: config.backoff_jitter,
        }
    }

    /// 第 `attempt` 次尝试（从 1 开始）失败后的退避时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        let capped = exponential.min(self.max_delay_ms) as f64;

        // 添加随机抖动以避免雷群效应
        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            0.0
        };
        let millis = (capped + jitter).max(0.0) as i64;
        Duration::milliseconds(millis)
    }

    /// 计算下次可领取时间
    pub fn next_attempt_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_for(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::milliseconds(5_000));
        assert_eq!(policy.delay_for(2), Duration::milliseconds(10_000));
        assert_eq!(policy.delay_for(3), Duration::milliseconds(20_000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            base_delay_ms: 5_000,
            max_delay_ms: 15_000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(3), Duration::milliseconds(15_000));
        assert_eq!(policy.delay_for(64), Duration::milliseconds(15_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter_factor: 0.1,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1).num_milliseconds();
            assert!((900..=1_100).contains(&delay), "delay {delay}");
        }
    }
}
