use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tradesync_core::config::SyncConfig;
use tradesync_core::models::{JobEvent, JobStatus, SyncCounts, SyncJob, SyncRun};
use tradesync_core::traits::SyncRunRepository;
use tradesync_core::SyncResult;
use tradesync_infrastructure::queue::QueueRegistry;

/// 任务的最终结果
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Completed(SyncCounts),
    Failed(String),
}

impl Outcome {
    fn from_event(event: &JobEvent) -> Option<Self> {
        match event {
            JobEvent::Completed { counts, .. } => Some(Outcome::Completed(*counts)),
            JobEvent::Failed { error, .. } => Some(Outcome::Failed(error.clone())),
            JobEvent::Stalled {
                job,
                requeued: false,
            } => Some(Outcome::Failed(
                job.last_error
                    .clone()
                    .unwrap_or_else(|| "任务停滞".to_string()),
            )),
            JobEvent::Stalled { requeued: true, .. } | JobEvent::RetryScheduled { .. } => None,
        }
    }

    fn from_job(job: &SyncJob) -> Option<Self> {
        match job.status {
            JobStatus::Completed => Some(Outcome::Completed(job.progress)),
            JobStatus::Failed => Some(Outcome::Failed(
                job.last_error
                    .clone()
                    .unwrap_or_else(|| "未知错误".to_string()),
            )),
            _ => None,
        }
    }
}

/// 运行跟踪器：把任务结果汇总到所属运行，并在全部任务结束或超时时结束运行
///
/// 有两条路径：队列事件通道（同进程、低延迟）和定期轮询任务存储（跨进程、可恢复）。
/// 同一任务的结果只会计入一次。
pub struct RunTracker {
    runs: Arc<dyn SyncRunRepository>,
    queues: Arc<QueueRegistry>,
    poll_interval: Duration,
}

impl RunTracker {
    pub fn new(
        runs: Arc<dyn SyncRunRepository>,
        queues: Arc<QueueRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runs,
            queues,
            poll_interval,
        }
    }

    pub fn from_config(
        runs: Arc<dyn SyncRunRepository>,
        queues: Arc<QueueRegistry>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(
            runs,
            queues,
            Duration::from_secs(config.tracker_poll_interval_seconds),
        )
    }

    /// 处理一个队列事件，返回所属运行是否发生变化
    pub async fn handle_event(&self, event: &JobEvent) -> SyncResult<bool> {
        let Some(outcome) = Outcome::from_event(event) else {
            return Ok(false);
        };
        let job = event.job();
        let Some(run_id) = job.run_id else {
            return Ok(false);
        };
        let Some(mut run) = self.runs.get(run_id).await? else {
            // 运行尚未保存，交给轮询路径处理
            debug!(run_id = %run_id, job_id = %job.id, "事件所属的运行尚不存在");
            return Ok(false);
        };

        let now = Utc::now();
        let resolved = apply(&mut run, job, outcome, now);
        let finalized = run.try_finalize(now);
        if !resolved && !finalized {
            return Ok(false);
        }
        self.persist(&run, finalized).await?;
        Ok(true)
    }

    /// 轮询全部进行中的运行：补齐遗漏的任务结果，并处理超时。返回发生变化的运行数
    pub async fn poll_running(&self, now: DateTime<Utc>) -> SyncResult<usize> {
        let mut changed_runs = 0;
        for mut run in self.runs.list_running().await? {
            let mut changed = false;

            for job_id in run.unresolved_jobs() {
                match self.queues.find_job(job_id).await? {
                    Some(job) => {
                        if let Some(outcome) = Outcome::from_job(&job) {
                            changed |= apply(&mut run, &job, outcome, now);
                        }
                    }
                    None => {
                        warn!(run_id = %run.run_id, job_id = %job_id, "任务记录已不存在，按失败处理");
                        changed |= run.record_failure(
                            job_id,
                            None,
                            None,
                            &SyncCounts::default(),
                            "任务记录不存在",
                            now,
                        );
                    }
                }
            }

            let finalized = run.try_finalize(now);
            let timed_out = !finalized && run.try_time_out(now);
            if timed_out {
                warn!(
                    run_id = %run.run_id,
                    unresolved = run.unresolved_jobs().len(),
                    deadline = %run.deadline,
                    "运行超时，保留部分计数"
                );
            }

            if changed || finalized || timed_out {
                self.persist(&run, finalized || timed_out).await?;
                changed_runs += 1;
            }
        }
        Ok(changed_runs)
    }

    async fn persist(&self, run: &SyncRun, finalized: bool) -> SyncResult<()> {
        self.runs.update(run).await?;
        if finalized {
            let totals = run.totals();
            info!(
                run_id = %run.run_id,
                status = run.status.as_str(),
                fetched = totals.fetched,
                upserted = totals.upserted,
                changed = totals.changed,
                failed_items = totals.failed,
                failed_jobs = run.failures.len(),
                "同步运行结束"
            );
            metrics::counter!("tradesync_runs_finalized_total", "status" => run.status.as_str())
                .increment(1);
        }
        Ok(())
    }

    /// 事件与轮询在同一个任务中串行处理，运行记录不会被并发覆盖
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<JobEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(poll_interval = ?self.poll_interval, "运行跟踪器已启动");
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut events_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(&event).await {
                            error!(job_id = %event.job().id, error = %e, "处理任务事件失败");
                        }
                    }
                    None => {
                        debug!("任务事件通道已关闭，仅保留轮询");
                        events_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_running(Utc::now()).await {
                        error!(error = %e, "轮询运行状态失败");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("运行跟踪器已停止");
    }
}

fn apply(run: &mut SyncRun, job: &SyncJob, outcome: Outcome, now: DateTime<Utc>) -> bool {
    match outcome {
        Outcome::Completed(counts) => run.record_completion(job.id, job.source(), &counts),
        Outcome::Failed(error) => {
            run.record_failure(job.id, job.source(), job.domain(), &job.progress, error, now)
        }
    }
}
