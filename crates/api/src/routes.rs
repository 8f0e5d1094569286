use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tradesync_core::traits::RateLimiter;
use tradesync_dispatcher::SyncOrchestrator;
use tradesync_infrastructure::queue::QueueRegistry;

use crate::auth::OperatorKey;
use crate::handlers::{
    admin::{failed_jobs, list_queues},
    health::health_check,
    metrics::render_metrics,
    sync::{get_latest_status, get_run_status, trigger_sync},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub queues: Arc<QueueRegistry>,
    pub operator_key: OperatorKey,
    /// 为 `None` 时不做入站限流
    pub inbound_limiter: Option<Arc<dyn RateLimiter>>,
    /// 可信反向代理，只有来自这些地址的连接才采信 `X-Forwarded-For`
    pub trusted_proxies: Arc<[IpAddr]>,
    pub metrics: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        // 同步运行
        .route("/sync", get(get_latest_status).post(trigger_sync))
        .route("/sync/{run_id}", get(get_run_status))
        // 队列监控，只读
        .route("/admin/queues", get(list_queues))
        .route("/admin/queues/{name}/failed", get(failed_jobs))
        .with_state(state)
}
