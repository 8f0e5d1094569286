use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use redis::aio::ConnectionManager;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tradesync_api::auth::OperatorKey;
use tradesync_api::routes::AppState;
use tradesync_core::config::{AppConfig, DatabaseBackend, QueueBackend, RateLimitBackend};
use tradesync_core::models::JobEvent;
use tradesync_core::traits::{
    CanonicalRepository, JobStore, RateLimiter, SourceRegistry, SyncRunRepository,
};
use tradesync_dispatcher::{CronScheduler, RunTracker, StallDetector, SyncOrchestrator, SyncScheduler};
use tradesync_domain::Reconciler;
use tradesync_infrastructure::database::{
    DatabaseManager, InMemoryCanonicalRepository, InMemorySyncRunRepository,
    SqliteCanonicalRepository, SqliteSyncRunRepository,
};
use tradesync_infrastructure::queue::{InMemoryJobStore, QueueRegistry, QueueSettings, RedisJobStore};
use tradesync_infrastructure::{build_rate_limiter, redis_connection};
use tradesync_worker::{
    build_registry, CleanupProcessor, OutboundThrottle, SourceHttpClient, SyncJobProcessor,
    WorkerPool,
};

use crate::shutdown::ShutdownManager;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 编排器、运行跟踪、停滞检测与定时同步
    Dispatcher,
    /// 各队列的工作者
    Worker,
    /// 仅运行API服务器
    Api,
    /// 运行所有组件
    All,
}

impl AppMode {
    pub fn parse(mode: &str, config: &AppConfig) -> Result<Self> {
        match mode {
            "dispatcher" => Ok(Self::Dispatcher),
            "worker" => Ok(Self::Worker),
            "api" => {
                if !config.api.enabled {
                    return Err(anyhow::anyhow!("API模式被禁用，请检查配置"));
                }
                Ok(Self::Api)
            }
            "all" => Ok(Self::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }

    fn runs_dispatcher(self) -> bool {
        matches!(self, Self::Dispatcher | Self::All)
    }

    fn runs_workers(self) -> bool {
        matches!(self, Self::Worker | Self::All)
    }

    fn runs_api(self, config: &AppConfig) -> bool {
        matches!(self, Self::Api | Self::All) && config.api.enabled
    }
}

/// 主应用程序：进程启动时构建一次全部共享组件，再按模式启动
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: Option<DatabaseManager>,
    queues: Arc<QueueRegistry>,
    runs: Arc<dyn SyncRunRepository>,
    canonical: Arc<dyn CanonicalRepository>,
    sources: SourceRegistry,
    inbound_limiter: Arc<dyn RateLimiter>,
    outbound_limiter: Arc<dyn RateLimiter>,
    orchestrator: Arc<SyncOrchestrator>,
    events: Mutex<Option<mpsc::UnboundedReceiver<JobEvent>>>,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let metrics = if config.observability.metrics_enabled {
            install_metrics_recorder()
        } else {
            None
        };

        let (database, canonical, runs) = create_repositories(&config).await?;
        let redis = create_redis_connection(&config).await?;
        let key_prefix = config.queue.redis.key_prefix.clone();

        // 只有本进程运行跟踪器时才需要事件通道，否则事件无人消费
        let (events_tx, events_rx) = if mode.runs_dispatcher() {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let store: Arc<dyn JobStore> = match (&config.queue.backend, redis.clone()) {
            (QueueBackend::Redis, Some(conn)) => {
                info!("任务队列后端: Redis ({})", config.queue.redis.redacted_url());
                Arc::new(RedisJobStore::new(conn, key_prefix.clone()))
            }
            (QueueBackend::Redis, None) => {
                return Err(anyhow::anyhow!(
                    "任务队列配置为 Redis 后端，但没有可用的 Redis 连接"
                ));
            }
            (QueueBackend::Memory, _) => {
                info!("任务队列后端: 内存");
                Arc::new(InMemoryJobStore::new())
            }
        };
        let queues = Arc::new(QueueRegistry::new(
            store,
            QueueSettings::from_config(&config.queue),
            events_tx,
        ));

        let inbound_limiter = build_rate_limiter(
            "inbound",
            &config.rate_limit,
            config.rate_limit.inbound,
            redis.clone(),
            &key_prefix,
        )?;
        let outbound_limiter = build_rate_limiter(
            "outbound",
            &config.rate_limit,
            config.rate_limit.outbound,
            redis,
            &key_prefix,
        )?;

        let throttle = Arc::new(OutboundThrottle::from_config(
            outbound_limiter.clone(),
            &config.rate_limit,
        ));
        let client = Arc::new(SourceHttpClient::new(throttle).context("创建HTTP客户端失败")?);
        let sources = build_registry(&config.sources, client);
        if sources.is_empty() {
            warn!("没有启用任何数据源，同步运行将立即完成");
        }

        let orchestrator = Arc::new(SyncOrchestrator::from_config(
            sources.clone(),
            queues.clone(),
            runs.clone(),
            &config.sync,
        ));

        Ok(Self {
            config,
            mode,
            database,
            queues,
            runs,
            canonical,
            sources,
            inbound_limiter,
            outbound_limiter,
            orchestrator,
            events: Mutex::new(events_rx),
            metrics,
        })
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn queues(&self) -> Arc<QueueRegistry> {
        self.queues.clone()
    }

    pub fn canonical(&self) -> Arc<dyn CanonicalRepository> {
        self.canonical.clone()
    }

    /// 启动当前模式的全部组件，直到收到关闭信号
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);
        let mut shutdown_rx = shutdown.subscribe();
        let mut handles = Vec::new();

        if self.mode.runs_dispatcher() {
            handles.extend(self.start_dispatcher(&shutdown).await?);
        }
        if self.mode.runs_workers() {
            handles.extend(self.start_workers(&shutdown));
        }
        if self.mode.runs_api(&self.config) {
            handles.push(self.start_api(&shutdown));
        }

        let _ = shutdown_rx.recv().await;
        info!("应用程序收到关闭信号");

        // 关闭后不再接受新任务，进行中的任务继续完成
        self.queues.close_all();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("组件任务异常退出: {e}");
            }
        }

        if let Some(database) = &self.database {
            database.close().await;
        }
        info!("所有组件已停止");
        Ok(())
    }

    async fn start_dispatcher(&self, shutdown: &ShutdownManager) -> Result<Vec<JoinHandle<()>>> {
        info!("启动Dispatcher服务");
        let mut handles = Vec::new();

        let tracker = Arc::new(RunTracker::from_config(
            self.runs.clone(),
            self.queues.clone(),
            &self.config.sync,
        ));
        let events = match self.events.lock().await.take() {
            Some(events) => events,
            None => return Err(anyhow::anyhow!("队列事件通道已被占用")),
        };
        handles.push(tokio::spawn(tracker.run(events, shutdown.subscribe())));

        let detector = Arc::new(StallDetector::from_config(
            self.queues.clone(),
            &self.config.queue,
        ));
        handles.push(tokio::spawn(detector.run(shutdown.subscribe())));

        if let Some(expression) = &self.config.sync.schedule {
            let cron = CronScheduler::new(expression).context("解析同步计划失败")?;
            let scheduler = SyncScheduler::new(self.orchestrator.clone(), cron);
            handles.push(tokio::spawn(scheduler.run(shutdown.subscribe())));
        }

        Ok(handles)
    }

    fn start_workers(&self, shutdown: &ShutdownManager) -> Vec<JoinHandle<()>> {
        info!("启动Worker服务");
        let reconciler = Arc::new(Reconciler::new(
            self.canonical.clone(),
            self.sources.priorities(),
        ));
        let sync_processor = Arc::new(
            SyncJobProcessor::new(self.sources.clone(), reconciler)
                .with_source_limits(&self.config.sources),
        );
        let cleanup_processor = Arc::new(CleanupProcessor::new(
            self.queues.clone(),
            vec![self.inbound_limiter.clone(), self.outbound_limiter.clone()],
        ));
        let pool = WorkerPool::new(
            &self.queues,
            sync_processor,
            cleanup_processor,
            &self.config.queue,
        );
        pool.start(shutdown.sender())
    }

    fn start_api(&self, shutdown: &ShutdownManager) -> JoinHandle<()> {
        info!("启动API服务器: {}", self.config.api.bind_address);
        let state = AppState {
            orchestrator: self.orchestrator.clone(),
            queues: self.queues.clone(),
            operator_key: OperatorKey::new(&self.config.api.operator_key),
            inbound_limiter: Some(self.inbound_limiter.clone()),
            trusted_proxies: self.config.api.trusted_proxy_addrs().into(),
            metrics: self.metrics.clone(),
        };
        let api_config = self.config.api.clone();
        let router = tradesync_api::create_app(state, &api_config);
        let signal = shutdown.signal();

        tokio::spawn(async move {
            if let Err(e) = tradesync_api::serve(&api_config, router, signal).await {
                error!("API服务器运行失败: {e}");
            }
        })
    }
}

/// 规范库与运行记录的存储
async fn create_repositories(
    config: &AppConfig,
) -> Result<(
    Option<DatabaseManager>,
    Arc<dyn CanonicalRepository>,
    Arc<dyn SyncRunRepository>,
)> {
    match config.database.backend {
        DatabaseBackend::Memory => {
            info!("规范库后端: 内存");
            Ok((
                None,
                Arc::new(InMemoryCanonicalRepository::new()),
                Arc::new(InMemorySyncRunRepository::new()),
            ))
        }
        DatabaseBackend::Sqlite => {
            info!("连接数据库: {}", config.database.url);
            let database = DatabaseManager::new(&config.database).await?;
            database.migrate().await?;
            let pool = database.pool().clone();
            info!("数据库连接成功");
            Ok((
                Some(database),
                Arc::new(SqliteCanonicalRepository::new(pool.clone())),
                Arc::new(SqliteSyncRunRepository::new(pool)),
            ))
        }
    }
}

/// 任务队列或限流器选择 Redis 后端时建立共享连接
async fn create_redis_connection(config: &AppConfig) -> Result<Option<ConnectionManager>> {
    let needed = config.queue.backend == QueueBackend::Redis
        || config.rate_limit.backend == RateLimitBackend::Redis;
    if !needed {
        return Ok(None);
    }
    info!("连接Redis: {}", config.queue.redis.redacted_url());
    let conn = redis_connection::connect(&config.queue.redis)
        .await
        .context("连接Redis失败")?;
    Ok(Some(conn))
}

/// 安装全局 Prometheus 记录器；进程内已安装过时返回 None
fn install_metrics_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("安装Prometheus记录器失败，/metrics 将不可用: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        let config = AppConfig::default();
        assert_eq!(AppMode::parse("all", &config).unwrap(), AppMode::All);
        assert_eq!(AppMode::parse("worker", &config).unwrap(), AppMode::Worker);
        assert!(AppMode::parse("scheduler", &config).is_err());

        let mut config = AppConfig::default();
        config.api.enabled = false;
        assert!(AppMode::parse("api", &config).is_err());
        assert!(!AppMode::All.runs_api(&config));
        assert!(AppMode::All.runs_workers());
        assert!(!AppMode::Api.runs_dispatcher());
    }
}
