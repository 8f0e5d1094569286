use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tradesync_core::config::QueueConfig;
use tradesync_core::models::{JobEvent, SyncJob, CLEANUP_QUEUE};
use tradesync_core::SyncResult;
use tradesync_infrastructure::queue::{JobQueue, QueueRegistry};

use crate::processor::JobProcessor;

/// 单个队列的工作者：按并发度拉取任务，执行期间定期发送心跳
pub struct QueueWorker {
    worker_id: String,
    queue: Arc<JobQueue>,
    processor: Arc<dyn JobProcessor>,
    concurrency: usize,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    job_timeout: Duration,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<JobQueue>,
        processor: Arc<dyn JobProcessor>,
        concurrency: usize,
        poll_interval: Duration,
        heartbeat_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            worker_id: format!("{host}-{}", queue.name()),
            queue,
            processor,
            concurrency: concurrency.max(1),
            poll_interval,
            heartbeat_interval,
            job_timeout,
        }
    }

    pub fn from_config(
        queue: Arc<JobQueue>,
        processor: Arc<dyn JobProcessor>,
        config: &QueueConfig,
    ) -> Self {
        let concurrency = config.concurrency_for(queue.name());
        Self::new(
            queue,
            processor,
            concurrency,
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_secs(config.heartbeat_interval_seconds),
            Duration::from_secs(config.job_timeout_seconds),
        )
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 领取并执行一个任务；队列为空时返回 `None`
    pub async fn poll_once(&self) -> SyncResult<Option<JobEvent>> {
        let Some(job) = self.queue.claim(Utc::now()).await? else {
            return Ok(None);
        };
        self.run_job(job).await
    }

    async fn run_job(&self, mut job: SyncJob) -> SyncResult<Option<JobEvent>> {
        let heartbeat = self.spawn_heartbeat(job.clone());
        let result = tokio::time::timeout(
            self.job_timeout,
            self.processor.process(&self.queue, &mut job),
        )
        .await;
        heartbeat.abort();

        let now = Utc::now();
        match result {
            Ok(Ok(counts)) => self.queue.complete(job, counts, now).await,
            Ok(Err(e)) => {
                warn!(
                    worker_id = %self.worker_id,
                    job = %job.describe(),
                    attempt = job.attempt,
                    transient = e.is_transient(),
                    error = %e,
                    "任务执行失败"
                );
                self.queue.fail(job, e.to_string(), now).await
            }
            Err(_) => {
                let message = format!("任务执行超时（{} 秒）", self.job_timeout.as_secs());
                warn!(worker_id = %self.worker_id, job = %job.describe(), "{}", message);
                self.queue.fail(job, message, now).await
            }
        }
    }

    fn spawn_heartbeat(&self, job: SyncJob) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let period = self.heartbeat_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            // 第一次 tick 立即返回，领取时已写入心跳
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.heartbeat(&job, Utc::now()).await {
                    Ok(true) => debug!(job_id = %job.id, "心跳已刷新"),
                    Ok(false) => {
                        warn!(job_id = %job.id, attempt = job.attempt, "任务已不属于当前尝试，停止心跳");
                        break;
                    }
                    Err(e) => error!(job_id = %job.id, error = %e, "刷新心跳失败"),
                }
            }
        })
    }

    /// 启动 `concurrency` 个拉取循环，收到关闭信号后在当前任务结束时退出
    pub fn start(self: Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!(
            worker_id = %self.worker_id,
            queue = %self.queue.name(),
            processor = self.processor.name(),
            concurrency = self.concurrency,
            "启动队列工作者"
        );
        (0..self.concurrency)
            .map(|slot| {
                let worker = Arc::clone(&self);
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move { worker.run_loop(slot, shutdown_rx).await })
            })
            .collect()
    }

    async fn run_loop(&self, slot: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker_id = %self.worker_id, slot, error = %e, "拉取任务失败");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
        }
        info!(worker_id = %self.worker_id, slot, "队列工作者已停止");
    }
}

/// 全部队列的工作者集合
pub struct WorkerPool {
    workers: Vec<Arc<QueueWorker>>,
}

impl WorkerPool {
    /// 同步队列使用 `sync_processor`，维护队列使用 `cleanup_processor`
    pub fn new(
        registry: &QueueRegistry,
        sync_processor: Arc<dyn JobProcessor>,
        cleanup_processor: Arc<dyn JobProcessor>,
        config: &QueueConfig,
    ) -> Self {
        let workers = registry
            .queues()
            .map(|queue| {
                let processor = if queue.name() == CLEANUP_QUEUE {
                    cleanup_processor.clone()
                } else {
                    sync_processor.clone()
                };
                Arc::new(QueueWorker::from_config(queue.clone(), processor, config))
            })
            .collect();
        Self { workers }
    }

    pub fn workers(&self) -> &[Arc<QueueWorker>] {
        &self.workers
    }

    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        self.workers
            .iter()
            .flat_map(|worker| Arc::clone(worker).start(shutdown))
            .collect()
    }
}
