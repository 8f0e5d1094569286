use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use tradesync_core::config::SyncConfig;
use tradesync_core::models::{JobPayload, SyncCounts, SyncRun};
use tradesync_core::traits::{SourceRegistry, SyncRunRepository};
use tradesync_core::{SyncError, SyncResult};
use tradesync_infrastructure::queue::QueueRegistry;
use uuid::Uuid;

/// 同步编排器
///
/// 每次触发都会产生一个独立的运行，不与进行中的运行互斥。
pub struct SyncOrchestrator {
    sources: SourceRegistry,
    queues: Arc<QueueRegistry>,
    runs: Arc<dyn SyncRunRepository>,
    run_timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        sources: SourceRegistry,
        queues: Arc<QueueRegistry>,
        runs: Arc<dyn SyncRunRepository>,
        run_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            queues,
            runs,
            run_timeout,
        }
    }

    pub fn from_config(
        sources: SourceRegistry,
        queues: Arc<QueueRegistry>,
        runs: Arc<dyn SyncRunRepository>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(
            sources,
            queues,
            runs,
            Duration::from_secs(config.run_timeout_seconds),
        )
    }

    /// 创建运行并为每个 (数据源, 领域) 组合投递一个同步任务，另投递一个维护任务。
    /// 不等待任务完成
    #[instrument(skip(self))]
    pub async fn trigger_full_sync(&self) -> SyncResult<Uuid> {
        let now = Utc::now();
        let run_id = Uuid::new_v4();
        let timeout = chrono::Duration::from_std(self.run_timeout)
            .map_err(|e| SyncError::Configuration(format!("运行超时时间无效: {e}")))?;
        let mut run = SyncRun::new(run_id, now, timeout);

        for (source, domain) in self.sources.pairs() {
            let enqueued = match self.queues.for_domain(domain) {
                Ok(queue) => {
                    queue
                        .add(JobPayload::Sync { source, domain }, Some(run_id), now)
                        .await
                }
                Err(e) => Err(e),
            };

            match enqueued {
                Ok(job) => run.job_ids.push(job.id),
                Err(e) => {
                    error!(run_id = %run_id, source = %source, domain = %domain, error = %e, "同步任务入队失败");
                    // 占位任务号，立即记为失败
                    let placeholder = Uuid::new_v4();
                    run.job_ids.push(placeholder);
                    run.record_failure(
                        placeholder,
                        Some(source),
                        Some(domain),
                        &SyncCounts::default(),
                        format!("入队失败: {e}"),
                        now,
                    );
                }
            }
        }

        match self.queues.cleanup() {
            Ok(queue) => {
                if let Err(e) = queue.add(JobPayload::Cleanup, Some(run_id), now).await {
                    warn!(run_id = %run_id, error = %e, "维护任务入队失败");
                }
            }
            Err(e) => warn!(run_id = %run_id, error = %e, "维护队列不可用"),
        }

        if run.try_finalize(now) {
            info!(run_id = %run_id, status = run.status.as_str(), "运行没有待完成的任务，立即结束");
            metrics::counter!("tradesync_runs_finalized_total", "status" => run.status.as_str())
                .increment(1);
        }

        self.runs.create(&run).await?;
        info!(
            run_id = %run_id,
            jobs = run.job_ids.len(),
            deadline = %run.deadline,
            "已触发全量同步"
        );
        Ok(run_id)
    }

    pub async fn get_latest_status(&self) -> SyncResult<Option<SyncRun>> {
        self.runs.latest().await
    }

    pub async fn get_status(&self, run_id: Uuid) -> SyncResult<SyncRun> {
        self.runs
            .get(run_id)
            .await?
            .ok_or(SyncError::RunNotFound { id: run_id })
    }
}
