use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info};
use tradesync_core::config::QueueConfig;
use tradesync_core::models::JobEvent;
use tradesync_core::SyncResult;
use tradesync_infrastructure::queue::QueueRegistry;

/// 停滞检测：定期扫描所有队列中心跳超时的活跃任务
pub struct StallDetector {
    queues: Arc<QueueRegistry>,
    interval: Duration,
}

impl StallDetector {
    pub fn new(queues: Arc<QueueRegistry>, interval: Duration) -> Self {
        Self { queues, interval }
    }

    pub fn from_config(queues: Arc<QueueRegistry>, config: &QueueConfig) -> Self {
        Self::new(queues, Duration::from_secs(config.stall_check_interval_seconds))
    }

    /// 执行一次检测，返回产生的停滞事件
    pub async fn check_once(&self, now: DateTime<Utc>) -> SyncResult<Vec<JobEvent>> {
        let mut events = Vec::new();
        for queue in self.queues.queues() {
            events.extend(queue.recover_stalled(now).await?);
        }
        if !events.is_empty() {
            info!(stalled = events.len(), "本轮检测到停滞任务");
        }
        Ok(events)
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval = ?self.interval, "停滞检测已启动");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_once(Utc::now()).await {
                        error!(error = %e, "停滞检测失败");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("停滞检测已停止");
    }
}
