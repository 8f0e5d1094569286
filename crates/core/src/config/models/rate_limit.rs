use serde::{Deserialize, Serialize};

/// 限流存储后端
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    #[default]
    Memory,
    Redis,
}

/// 滑动窗口参数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowConfig {
    pub window_ms: u64,
    pub max_requests: u64,
}

impl WindowConfig {
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.window_ms == 0 {
            return Err(anyhow::anyhow!("{name} 限流窗口必须大于0"));
        }
        if self.max_requests == 0 {
            return Err(anyhow::anyhow!("{name} 限流请求上限必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    /// 存储故障时放行请求
    pub fail_open: bool,
    pub inbound: WindowConfig,
    pub outbound: WindowConfig,
    /// 出站调用被限流时的最长等待
    pub outbound_max_wait_ms: u64,
    pub outbound_retry_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Memory,
            fail_open: true,
            inbound: WindowConfig {
                window_ms: 60_000,
                max_requests: 100,
            },
            outbound: WindowConfig {
                window_ms: 60_000,
                max_requests: 60,
            },
            outbound_max_wait_ms: 30_000,
            outbound_retry_interval_ms: 250,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.inbound.validate("入站")?;
        self.outbound.validate("出站")?;
        if self.outbound_retry_interval_ms == 0 {
            return Err(anyhow::anyhow!("出站限流重试间隔必须大于0"));
        }
        Ok(())
    }
}
