use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 编排器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 周期性全量同步的cron表达式（含秒字段）
    pub schedule: Option<String>,
    pub run_timeout_seconds: u64,
    pub tracker_poll_interval_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schedule: None,
            run_timeout_seconds: 3600,
            tracker_poll_interval_seconds: 5,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(expr) = &self.schedule {
            cron::Schedule::from_str(expr)
                .map_err(|e| anyhow::anyhow!("无效的cron表达式 '{expr}': {e}"))?;
        }

        if self.run_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("运行超时时间必须大于0"));
        }

        if self.tracker_poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("运行跟踪轮询间隔必须大于0"));
        }

        Ok(())
    }
}
