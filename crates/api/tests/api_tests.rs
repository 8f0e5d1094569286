use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tower::ServiceExt;
use tradesync_api::auth::OperatorKey;
use tradesync_api::create_app;
use tradesync_api::routes::AppState;
use tradesync_core::config::{ApiConfig, WindowConfig};
use tradesync_core::models::{Domain, SourceId, SourceRecord, PRODUCTS_QUEUE};
use tradesync_core::traits::{RateLimiter, RawBatch, SourceAdapter, SourceRegistry};
use tradesync_core::{SyncError, SyncResult};
use tradesync_dispatcher::SyncOrchestrator;
use tradesync_infrastructure::database::InMemorySyncRunRepository;
use tradesync_infrastructure::queue::{InMemoryJobStore, QueueRegistry, QueueSettings};
use tradesync_infrastructure::rate_limiter::InMemoryRateLimiter;

const OPERATOR_KEY: &str = "test-operator-key";
const PROXY_ADDR: &str = "10.0.0.1";

struct ProductsOnly;

#[async_trait]
impl SourceAdapter for ProductsOnly {
    fn source_id(&self) -> SourceId {
        SourceId::TariffSchedule
    }

    fn domains(&self) -> &[Domain] {
        &[Domain::Product]
    }

    async fn fetch(&self, _domain: Domain, _cursor: Option<&str>) -> SyncResult<RawBatch> {
        Ok(RawBatch::default())
    }

    fn normalize_item(
        &self,
        _domain: Domain,
        _raw: &Value,
        _fetched_at: DateTime<Utc>,
    ) -> SyncResult<SourceRecord> {
        Err(SyncError::Internal("not used".to_string()))
    }
}

struct TestApp {
    router: Router,
    queues: Arc<QueueRegistry>,
}

fn test_app(inbound_limit: Option<u64>) -> TestApp {
    let queues = Arc::new(QueueRegistry::new(
        Arc::new(InMemoryJobStore::new()),
        QueueSettings::default(),
        None,
    ));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        SourceRegistry::new().with(Arc::new(ProductsOnly), 50),
        queues.clone(),
        Arc::new(InMemorySyncRunRepository::new()),
        Duration::from_secs(3600),
    ));
    let inbound_limiter = inbound_limit.map(|max_requests| {
        Arc::new(InMemoryRateLimiter::new(
            "inbound",
            WindowConfig {
                window_ms: 60_000,
                max_requests,
            },
        )) as Arc<dyn RateLimiter>
    });
    let state = AppState {
        orchestrator,
        queues: queues.clone(),
        operator_key: OperatorKey::new(OPERATOR_KEY),
        inbound_limiter,
        trusted_proxies: vec![PROXY_ADDR.parse::<IpAddr>().unwrap()].into(),
        metrics: None,
    };
    let config = ApiConfig {
        operator_key: OPERATOR_KEY.to_string(),
        ..ApiConfig::default()
    };
    TestApp {
        router: create_app(state, &config),
        queues,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn operator_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Operator-Key", OPERATOR_KEY)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_needs_no_credentials() {
    let app = test_app(None);
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_trigger_requires_operator_key() {
    let app = test_app(None);

    let request = Request::builder()
        .method("POST")
        .uri("/sync")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let request = Request::builder()
        .method("POST")
        .uri("/sync")
        .header("X-Operator-Key", "wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_trigger_and_read_status() {
    let app = test_app(None);

    let (status, body) = send(&app, get("/sync")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());

    let (status, body) = send(&app, operator_request("POST", "/sync")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = body["data"]["runId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get("/sync")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["runId"], run_id.as_str());
    assert_eq!(body["data"]["status"], "running");
    assert!(body["data"]["perSourceCounts"].is_object());
    assert!(body["data"]["failures"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, get(&format!("/sync/{run_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["runId"], run_id.as_str());
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let app = test_app(None);
    let (status, body) = send(&app, get(&format!("/sync/{}", uuid::Uuid::new_v4()))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("不存在"));
}

#[tokio::test]
async fn test_queue_monitoring() {
    let app = test_app(None);

    let (status, _) = send(&app, get("/admin/queues")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    send(&app, operator_request("POST", "/sync")).await;
    let (status, body) = send(&app, operator_request("GET", "/admin/queues")).await;
    assert_eq!(status, StatusCode::OK);

    let queues = body["data"].as_array().unwrap();
    assert_eq!(queues.len(), 4);
    let products = queues
        .iter()
        .find(|q| q["name"] == PRODUCTS_QUEUE)
        .unwrap();
    assert_eq!(products["counts"]["waiting"], 1);
    assert!(!body.to_string().contains(OPERATOR_KEY));
}

#[tokio::test]
async fn test_failed_jobs_listing() {
    let app = test_app(None);
    send(&app, operator_request("POST", "/sync")).await;

    let queue = app.queues.get(PRODUCTS_QUEUE).unwrap();
    let mut now = Utc::now();
    for _ in 0..3 {
        let job = queue.claim(now).await.unwrap().unwrap();
        queue.fail(job, "HTTP 502: bad gateway", now).await.unwrap();
        now += chrono::Duration::minutes(10);
    }

    let (status, body) = send(
        &app,
        operator_request("GET", "/admin/queues/products/failed?limit=5"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["attempt"], 3);
    assert_eq!(jobs[0]["lastError"], "HTTP 502: bad gateway");
    assert_eq!(jobs[0]["payload"]["kind"], "sync");

    let (status, _) = send(&app, operator_request("GET", "/admin/queues/nope/failed")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// 经由某个连接对端发出的请求，附带客户端声明的转发地址
fn forwarded_from(peer: &str, forwarded_for: &str) -> Request<Body> {
    let peer: SocketAddr = format!("{peer}:40000").parse().unwrap();
    let mut request = Request::builder()
        .uri("/sync")
        .header("X-Forwarded-For", forwarded_for)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

#[tokio::test]
async fn test_inbound_rate_limit_per_client() {
    let app = test_app(Some(2));
    let from = |ip: &str| forwarded_from(PROXY_ADDR, ip);

    assert_eq!(send(&app, from("198.51.100.1")).await.0, StatusCode::OK);
    assert_eq!(send(&app, from("198.51.100.1")).await.0, StatusCode::OK);
    let (status, body) = send(&app, from("198.51.100.1, 10.0.0.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);

    assert_eq!(send(&app, from("198.51.100.2")).await.0, StatusCode::OK);
    for _ in 0..5 {
        assert_eq!(send(&app, get("/health")).await.0, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_forwarded_header_from_direct_client_cannot_dodge_limit() {
    let app = test_app(Some(2));
    let direct = "203.0.113.50";

    assert_eq!(send(&app, forwarded_from(direct, "192.0.2.1")).await.0, StatusCode::OK);
    assert_eq!(send(&app, forwarded_from(direct, "192.0.2.2")).await.0, StatusCode::OK);
    let (status, _) = send(&app, forwarded_from(direct, "192.0.2.3")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // 其他客户端不受影响
    assert_eq!(
        send(&app, forwarded_from("203.0.113.51", "192.0.2.3")).await.0,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_metrics_disabled() {
    let app = test_app(None);
    let (status, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
