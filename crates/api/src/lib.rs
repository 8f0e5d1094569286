//! # TradeSync API
//!
//! 同步引擎的 HTTP 接口，基于 Axum 构建。
//!
//! ## API 端点
//!
//! - `POST /sync` - 触发全量同步（需要运维凭据）
//! - `GET /sync` - 最近一次同步运行
//! - `GET /sync/{runId}` - 指定同步运行
//! - `GET /admin/queues` - 各队列任务计数（需要运维凭据）
//! - `GET /admin/queues/{name}/failed` - 死信任务（需要运维凭据）
//! - `GET /health` - 健康检查，不受入站限流约束
//! - `GET /metrics` - Prometheus 指标
//!
//! 运维凭据通过 `X-Operator-Key` 请求头提交，与终端用户认证无关。
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "runId": "..." },
//!   "message": null,
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::info;
use tradesync_core::config::ApiConfig;

use middleware::{cors_layer, inbound_rate_limit, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let router = create_routes(state.clone())
        .layer(axum::middleware::from_fn_with_state(state, inbound_rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(trace_layer())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.request_timeout_seconds,
                ))),
        );

    if config.cors_enabled {
        router.layer(cors_layer(config))
    } else {
        router
    }
}

/// 绑定地址并提供服务，`shutdown` 完成后停止接收新连接
pub async fn serve(
    config: &ApiConfig,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    info!(address = %listener.local_addr()?, "API服务已启动");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    info!("API服务已停止");
    Ok(())
}
