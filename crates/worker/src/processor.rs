use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};
use tradesync_core::config::SourcesConfig;
use tradesync_core::models::{JobPayload, SourceId, SyncCounts, SyncJob};
use tradesync_core::traits::{RateLimiter, SourceRegistry};
use tradesync_core::{SyncError, SyncResult};
use tradesync_domain::Reconciler;
use tradesync_infrastructure::queue::{JobQueue, QueueRegistry};

/// 任务处理器。返回的计数会在任务完成时写入任务记录
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// 处理一个已领取的任务；可通过 `queue` 写入检查点
    async fn process(&self, queue: &JobQueue, job: &mut SyncJob) -> SyncResult<SyncCounts>;

    fn name(&self) -> &str;
}

/// 同步任务：分页抓取 → 规范化 → 对账，每页写一次检查点
pub struct SyncJobProcessor {
    sources: SourceRegistry,
    reconciler: Arc<Reconciler>,
    max_pages: BTreeMap<SourceId, u32>,
    default_max_pages: u32,
}

impl SyncJobProcessor {
    pub fn new(sources: SourceRegistry, reconciler: Arc<Reconciler>) -> Self {
        Self {
            sources,
            reconciler,
            max_pages: BTreeMap::new(),
            default_max_pages: 50,
        }
    }

    pub fn with_max_pages(mut self, source: SourceId, max_pages: u32) -> Self {
        self.max_pages.insert(source, max_pages);
        self
    }

    /// 按数据源配置设置单任务最大页数
    pub fn with_source_limits(mut self, config: &SourcesConfig) -> Self {
        for (source, source_config) in config.enabled() {
            self.max_pages.insert(source, source_config.max_pages);
        }
        self
    }

    fn max_pages_for(&self, source: SourceId) -> u32 {
        self.max_pages
            .get(&source)
            .copied()
            .unwrap_or(self.default_max_pages)
    }
}

#[async_trait]
impl JobProcessor for SyncJobProcessor {
    #[instrument(skip_all, fields(job_id = %job.id, attempt = job.attempt))]
    async fn process(&self, queue: &JobQueue, job: &mut SyncJob) -> SyncResult<SyncCounts> {
        let JobPayload::Sync { source, domain } = job.payload else {
            return Err(SyncError::Internal(format!(
                "同步处理器无法处理任务 {}",
                job.describe()
            )));
        };
        let adapter = self.sources.get(source)?;
        let max_pages = self.max_pages_for(source);

        // 带游标的重试沿用全部计数；从头重来时只保留已经落库的写入和变更
        let mut counts = if job.cursor.is_some() {
            job.progress
        } else {
            SyncCounts {
                upserted: job.progress.upserted,
                changed: job.progress.changed,
                ..SyncCounts::default()
            }
        };
        let mut pages = 0u32;

        loop {
            if pages >= max_pages {
                warn!(source = %source, domain = %domain, max_pages, "达到单任务最大页数，提前结束");
                break;
            }

            let batch = adapter.fetch(domain, job.cursor.as_deref()).await?;
            pages += 1;
            let fetched_at = Utc::now();

            let (records, normalize_failures) = adapter.normalize(domain, &batch, fetched_at);
            for failure in &normalize_failures {
                warn!(
                    source = %source,
                    domain = %domain,
                    external_id = %failure.external_id,
                    error = %failure.error,
                    "记录规范化失败"
                );
            }

            let report = self
                .reconciler
                .reconcile(records, job.run_id, fetched_at)
                .await;

            counts.fetched += batch.items.len() as u64;
            counts.upserted += report.upserted;
            counts.changed += report.changed;
            counts.failed += normalize_failures.len() as u64 + report.failed();

            job.cursor = batch.next_cursor;
            job.progress = counts;
            if !queue.checkpoint(job).await? {
                return Err(SyncError::JobQueue(format!(
                    "任务 {} 已不属于第 {} 次尝试",
                    job.id, job.attempt
                )));
            }

            if job.cursor.is_none() {
                break;
            }
        }

        info!(
            source = %source,
            domain = %domain,
            pages,
            fetched = counts.fetched,
            changed = counts.changed,
            failed_items = counts.failed,
            "同步任务处理完成"
        );

        if counts.is_total_failure() {
            return Err(SyncError::Reconciliation(format!(
                "全部 {} 条记录处理失败",
                counts.fetched
            )));
        }
        Ok(counts)
    }

    fn name(&self) -> &str {
        "sync"
    }
}

/// 维护任务：按保留上限清理各队列历史，并清理空闲的限流窗口
pub struct CleanupProcessor {
    queues: Arc<QueueRegistry>,
    limiters: Vec<Arc<dyn RateLimiter>>,
}

impl CleanupProcessor {
    pub fn new(queues: Arc<QueueRegistry>, limiters: Vec<Arc<dyn RateLimiter>>) -> Self {
        Self { queues, limiters }
    }
}

#[async_trait]
impl JobProcessor for CleanupProcessor {
    async fn process(&self, _queue: &JobQueue, job: &mut SyncJob) -> SyncResult<SyncCounts> {
        if !matches!(job.payload, JobPayload::Cleanup) {
            return Err(SyncError::Internal(format!(
                "清理处理器无法处理任务 {}",
                job.describe()
            )));
        }

        let mut removed_jobs = 0;
        for queue in self.queues.queues() {
            removed_jobs += queue.clean().await?;
        }

        let mut pruned_windows = 0;
        for limiter in &self.limiters {
            match limiter.prune_expired().await {
                Ok(n) => pruned_windows += n,
                Err(e) => warn!(limiter = limiter.name(), error = %e, "清理限流窗口失败"),
            }
        }

        info!(removed_jobs, pruned_windows, "维护任务完成");
        Ok(SyncCounts::default())
    }

    fn name(&self) -> &str {
        "cleanup"
    }
}
