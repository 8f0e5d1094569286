use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};
use tradesync_core::config::ApiConfig;

use crate::auth::OPERATOR_KEY_HEADER;
use crate::error::ApiError;
use crate::routes::AppState;

/// 不受入站限流约束的路径
const UNLIMITED_PATHS: [&str; 1] = ["/health"];

/// 入站限流：按客户端地址计数，超出窗口上限直接拒绝
pub async fn inbound_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = &state.inbound_limiter else {
        return next.run(request).await;
    };
    if UNLIMITED_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = format!(
        "ip:{}",
        client_address(request.headers(), peer, &state.trusted_proxies)
    );

    if limiter.is_limited(&key).await {
        warn!(client = %key, path = %request.uri().path(), "入站请求被限流");
        return ApiError::RateLimited.into_response();
    }
    debug!(client = %key, "入站请求通过限流检查");
    next.run(request).await
}

/// 客户端地址。
///
/// 连接对端是可信代理时，从右向左取 `X-Forwarded-For` 中第一个非可信代理的地址；
/// 否则直接使用对端地址，客户端自带的请求头不被采信。
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();
    hops.iter()
        .rev()
        .find(|hop| {
            hop.parse::<IpAddr>()
                .map_or(true, |ip| !trusted_proxies.contains(&ip))
        })
        .or_else(|| hops.first())
        .map(|hop| hop.to_string())
        .unwrap_or_else(|| peer.to_string())
}

pub fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origins = if config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            config
                .cors_origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(OPERATOR_KEY_HEADER),
        ])
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}
