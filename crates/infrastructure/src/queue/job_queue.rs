use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tradesync_core::config::QueueConfig;
use tradesync_core::models::{
    JobCounts, JobEvent, JobPayload, JobStatus, SyncCounts, SyncJob,
};
use tradesync_core::traits::JobStore;
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

use super::retry::RetryPolicy;

/// 单个队列的策略参数，对所有队列统一生效
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub retry: RetryPolicy,
    pub stall_threshold: Duration,
    pub max_stalled_count: u32,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.default_attempts,
            retry: RetryPolicy::from_config(config),
            stall_threshold: Duration::seconds(config.stall_threshold_seconds as i64),
            max_stalled_count: config.max_stalled_count,
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
        }
    }
}

/// 持久化的多工作者 FIFO 队列，负责重试、退避、死信和停滞恢复
pub struct JobQueue {
    name: String,
    store: Arc<dyn JobStore>,
    settings: QueueSettings,
    events: Option<mpsc::UnboundedSender<JobEvent>>,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn JobStore>,
        settings: QueueSettings,
        events: Option<mpsc::UnboundedSender<JobEvent>>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            settings,
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(queue = %self.name, "队列已关闭");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 新任务入队
    pub async fn add(
        &self,
        payload: JobPayload,
        run_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> SyncResult<SyncJob> {
        if self.is_closed() {
            return Err(SyncError::JobQueue(format!("队列 {} 已关闭", self.name)));
        }
        let job = SyncJob::new(
            self.name.clone(),
            payload,
            run_id,
            self.settings.max_attempts,
            now,
        );
        self.store.enqueue(&job).await?;
        debug!(queue = %self.name, job_id = %job.id, run_id = ?run_id, "任务已入队");
        Ok(job)
    }

    /// 领取下一个可执行任务；关闭后不再发放任务
    pub async fn claim(&self, now: DateTime<Utc>) -> SyncResult<Option<SyncJob>> {
        if self.is_closed() {
            return Ok(None);
        }
        let job = self.store.claim_next(&self.name, now).await?;
        if let Some(job) = &job {
            info!(
                queue = %self.name,
                job_id = %job.id,
                source = ?job.source(),
                domain = ?job.domain(),
                attempt = job.attempt,
                max_attempts = job.max_attempts,
                "领取任务"
            );
        }
        Ok(job)
    }

    /// 刷新心跳，返回任务是否仍归当前尝试所有
    pub async fn heartbeat(&self, job: &SyncJob, now: DateTime<Utc>) -> SyncResult<bool> {
        self.store.touch(job.id, job.attempt, now).await
    }

    /// 保存游标和累计计数，便于重试时断点续传
    pub async fn checkpoint(&self, job: &SyncJob) -> SyncResult<bool> {
        let saved = self.store.update_active(job, job.attempt).await?;
        if !saved {
            debug!(queue = %self.name, job_id = %job.id, "检查点写入被忽略，任务已不属于当前尝试");
        }
        Ok(saved)
    }

    /// 标记任务完成；迟到的报告返回 `None`
    pub async fn complete(
        &self,
        mut job: SyncJob,
        counts: SyncCounts,
        now: DateTime<Utc>,
    ) -> SyncResult<Option<JobEvent>> {
        let attempt = job.attempt;
        job.status = JobStatus::Completed;
        job.finished_at = Some(now);
        job.progress = counts;

        if !self.store.update_active(&job, attempt).await? {
            warn!(queue = %self.name, job_id = %job.id, attempt, "忽略迟到的完成报告");
            return Ok(None);
        }

        info!(
            queue = %self.name,
            job_id = %job.id,
            source = ?job.source(),
            domain = ?job.domain(),
            fetched = counts.fetched,
            changed = counts.changed,
            failed_items = counts.failed,
            "任务完成"
        );
        metrics::counter!("tradesync_jobs_completed_total", "queue" => self.name.clone())
            .increment(1);
        Ok(Some(self.emit(JobEvent::Completed { job, counts })))
    }

    /// 记录一次失败：尚有尝试次数时按退避重新排队，否则进入死信
    pub async fn fail(
        &self,
        mut job: SyncJob,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> SyncResult<Option<JobEvent>> {
        let error = error.into();
        let attempt = job.attempt;
        job.last_error = Some(error.clone());

        let event = if job.attempts_exhausted() {
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            JobEvent::Failed {
                job: job.clone(),
                error: error.clone(),
            }
        } else {
            let next_attempt_at = self.settings.retry.next_attempt_at(attempt, now);
            job.status = JobStatus::Waiting;
            job.available_at = next_attempt_at;
            JobEvent::RetryScheduled {
                job: job.clone(),
                error: error.clone(),
                next_attempt_at,
            }
        };

        if !self.store.update_active(&job, attempt).await? {
            warn!(queue = %self.name, job_id = %job.id, attempt, "忽略迟到的失败报告");
            return Ok(None);
        }

        match &event {
            JobEvent::Failed { .. } => {
                warn!(
                    queue = %self.name,
                    job_id = %job.id,
                    source = ?job.source(),
                    domain = ?job.domain(),
                    attempt,
                    "任务重试耗尽，进入死信: {error}"
                );
                metrics::counter!("tradesync_jobs_failed_total", "queue" => self.name.clone())
                    .increment(1);
            }
            JobEvent::RetryScheduled {
                next_attempt_at, ..
            } => {
                warn!(
                    queue = %self.name,
                    job_id = %job.id,
                    source = ?job.source(),
                    domain = ?job.domain(),
                    attempt,
                    next_attempt_at = %next_attempt_at,
                    "任务失败，已安排重试: {error}"
                );
                metrics::counter!("tradesync_jobs_retried_total", "queue" => self.name.clone())
                    .increment(1);
            }
            _ => {}
        }
        Ok(Some(self.emit(event)))
    }

    /// 检测心跳超时的活跃任务：首次停滞立即重新排队，超过上限或尝试耗尽则进入死信
    pub async fn recover_stalled(&self, now: DateTime<Utc>) -> SyncResult<Vec<JobEvent>> {
        let threshold = now - self.settings.stall_threshold;
        let stale = self.store.list_stale_active(&self.name, threshold).await?;
        let mut events = Vec::new();

        for mut job in stale {
            let attempt = job.attempt;
            job.stalled_count += 1;
            let requeue =
                job.stalled_count <= self.settings.max_stalled_count && !job.attempts_exhausted();

            if requeue {
                job.status = JobStatus::Stalled;
                job.available_at = now;
            } else {
                job.status = JobStatus::Failed;
                job.finished_at = Some(now);
                job.last_error = Some(format!(
                    "任务停滞 {} 次（第 {} 次尝试），超过上限",
                    job.stalled_count, attempt
                ));
            }

            if !self.store.update_active(&job, attempt).await? {
                continue;
            }

            warn!(
                queue = %self.name,
                job_id = %job.id,
                source = ?job.source(),
                domain = ?job.domain(),
                attempt,
                stalled_count = job.stalled_count,
                requeued = requeue,
                "检测到停滞任务"
            );
            metrics::counter!("tradesync_jobs_stalled_total", "queue" => self.name.clone())
                .increment(1);
            if !requeue {
                metrics::counter!("tradesync_jobs_failed_total", "queue" => self.name.clone())
                    .increment(1);
            }
            events.push(self.emit(JobEvent::Stalled {
                job,
                requeued: requeue,
            }));
        }
        Ok(events)
    }

    pub async fn counts(&self, now: DateTime<Utc>) -> SyncResult<JobCounts> {
        self.store.counts(&self.name, now).await
    }

    pub async fn list(&self, status: JobStatus, limit: usize) -> SyncResult<Vec<SyncJob>> {
        self.store.list(&self.name, status, limit).await
    }

    pub async fn failed_jobs(&self, limit: usize) -> SyncResult<Vec<SyncJob>> {
        self.list(JobStatus::Failed, limit).await
    }

    pub async fn get_job(&self, id: Uuid) -> SyncResult<Option<SyncJob>> {
        Ok(self
            .store
            .get(id)
            .await?
            .filter(|job| job.queue_name == self.name))
    }

    /// 按保留上限清理历史任务
    pub async fn clean(&self) -> SyncResult<u64> {
        let removed = self
            .store
            .prune(
                &self.name,
                self.settings.keep_completed,
                self.settings.keep_failed,
            )
            .await?;
        if removed > 0 {
            info!(queue = %self.name, removed, "已清理历史任务");
        }
        Ok(removed)
    }

    fn emit(&self, event: JobEvent) -> JobEvent {
        if let Some(events) = &self.events {
            // 接收端关闭只意味着没有编排器在监听
            let _ = events.send(event.clone());
        }
        event
    }
}
