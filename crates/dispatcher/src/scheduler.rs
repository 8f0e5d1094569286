use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tradesync_core::{SyncError, SyncResult};

use crate::orchestrator::SyncOrchestrator;

/// CRON表达式解析和调度工具
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(expression: &str) -> SyncResult<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            SyncError::Configuration(format!("无效的cron表达式 '{expression}': {e}"))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }
}

/// 按cron表达式周期性触发全量同步
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    cron: CronScheduler,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, cron: CronScheduler) -> Self {
        Self { orchestrator, cron }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(schedule = self.cron.expression(), "定时同步已启动");
        loop {
            let now = Utc::now();
            let Some(next) = self.cron.next_execution_time(now) else {
                warn!(schedule = self.cron.expression(), "无法计算下一次执行时间，定时同步退出");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(
                next = %next.format("%Y-%m-%d %H:%M:%S UTC"),
                "等待下一次定时同步"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.orchestrator.trigger_full_sync().await {
                        Ok(run_id) => info!(run_id = %run_id, "定时同步已触发"),
                        Err(e) => error!(error = %e, "定时同步触发失败"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("定时同步已停止");
    }
}
