use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::ALL_QUEUES;

/// 任务队列后端
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    Memory,
    Redis,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            key_prefix: "tradesync".to_string(),
            connection_timeout_seconds: 30,
        }
    }
}

impl RedisConfig {
    /// Validate Redis configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        if self.key_prefix.is_empty() {
            return Err(anyhow::anyhow!("Redis键前缀不能为空"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        Ok(())
    }

    /// Build Redis connection URL
    pub fn build_url(&self) -> String {
        let auth = if let Some(password) = &self.password {
            format!(":{password}@")
        } else {
            String::new()
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }

    /// 不含密码的连接描述，用于日志
    pub fn redacted_url(&self) -> String {
        let auth = if self.password.is_some() { "***@" } else { "" };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

/// 任务队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub redis: RedisConfig,
    pub default_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// 退避抖动系数，0 表示关闭
    pub backoff_jitter: f64,
    pub stall_threshold_seconds: u64,
    pub max_stalled_count: u32,
    pub stall_check_interval_seconds: u64,
    pub keep_completed: usize,
    pub keep_failed: usize,
    pub default_concurrency: usize,
    /// 队列名 → 并发度
    pub concurrency: BTreeMap<String, usize>,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_seconds: u64,
    pub job_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let mut concurrency = BTreeMap::new();
        concurrency.insert("products".to_string(), 2);
        concurrency.insert("tariff-rates".to_string(), 2);
        concurrency.insert("trade-updates".to_string(), 2);
        concurrency.insert("cleanup".to_string(), 1);

        Self {
            backend: QueueBackend::Memory,
            redis: RedisConfig::default(),
            default_attempts: 3,
            backoff_base_ms: 5_000,
            backoff_max_ms: 300_000,
            backoff_jitter: 0.0,
            stall_threshold_seconds: 60,
            max_stalled_count: 1,
            stall_check_interval_seconds: 15,
            keep_completed: 100,
            keep_failed: 500,
            default_concurrency: 1,
            concurrency,
            poll_interval_ms: 500,
            heartbeat_interval_seconds: 10,
            job_timeout_seconds: 600,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == QueueBackend::Redis {
            self.redis.validate()?;
        }

        if self.default_attempts == 0 {
            return Err(anyhow::anyhow!("任务最大尝试次数必须大于0"));
        }

        if self.backoff_base_ms == 0 {
            return Err(anyhow::anyhow!("退避基础延迟必须大于0"));
        }

        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(anyhow::anyhow!("最大退避延迟不能小于基础延迟"));
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(anyhow::anyhow!("退避抖动系数必须在0到1之间"));
        }

        if self.stall_threshold_seconds == 0 {
            return Err(anyhow::anyhow!("停滞阈值必须大于0"));
        }

        if self.heartbeat_interval_seconds >= self.stall_threshold_seconds {
            return Err(anyhow::anyhow!("心跳间隔必须小于停滞阈值"));
        }

        if self.default_concurrency == 0 {
            return Err(anyhow::anyhow!("默认并发度必须大于0"));
        }

        for (queue, concurrency) in &self.concurrency {
            if !ALL_QUEUES.contains(&queue.as_str()) {
                return Err(anyhow::anyhow!("未知的队列: {queue}"));
            }
            if *concurrency == 0 {
                return Err(anyhow::anyhow!("队列 {queue} 的并发度必须大于0"));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.job_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn concurrency_for(&self, queue: &str) -> usize {
        self.concurrency
            .get(queue)
            .copied()
            .unwrap_or(self.default_concurrency)
    }
}
