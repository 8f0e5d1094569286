use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tradesync_core::config::{SourceConfig, WindowConfig};
use tradesync_core::models::{Domain, SourceId};
use tradesync_core::traits::SourceAdapter;
use tradesync_core::SyncError;
use tradesync_infrastructure::rate_limiter::InMemoryRateLimiter;
use tradesync_worker::adapters::{CustomsRulingsAdapter, FederalRegisterAdapter};
use tradesync_worker::{OutboundThrottle, SourceHttpClient};

async fn documents(
    State(base): State<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    if params.get("page").map(String::as_str) == Some("2") {
        return Json(json!({
            "results": [{
                "document_number": "2024-00002",
                "title": "Notice of Product Exclusion Extensions",
                "publication_date": "2024-05-20",
                "type": "Notice",
            }],
            "next_page_url": null,
        }));
    }
    assert_eq!(params.get("order").map(String::as_str), Some("newest"));
    Json(json!({
        "results": [{
            "document_number": "2024-00001",
            "title": "Section 301 Tariff Modifications",
            "abstract": "Modifies duties on certain products",
            "publication_date": "2024-05-14",
            "type": "Notice",
            "html_url": "https://www.federalregister.gov/d/2024-00001",
            "agencies": [{"name": "Office of the United States Trade Representative"}],
        }],
        "next_page_url": format!("{base}/documents.json?page=2"),
    }))
}

async fn rulings_unavailable() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "scheduled maintenance")
}

/// 启动本地数据源服务，返回其基础地址
async fn fixture_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/documents.json", get(documents))
        .route("/rulings", get(rulings_unavailable))
        .with_state(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

fn source_config(base_url: &str) -> SourceConfig {
    SourceConfig {
        enabled: true,
        base_url: base_url.to_string(),
        priority: 10,
        page_size: 20,
        request_timeout_seconds: 5,
        max_pages: 10,
    }
}

fn client(max_requests: u64, max_wait: Duration) -> Arc<SourceHttpClient> {
    let limiter = Arc::new(InMemoryRateLimiter::new(
        "outbound",
        WindowConfig {
            window_ms: 60_000,
            max_requests,
        },
    ));
    let throttle = OutboundThrottle::new(limiter, max_wait, Duration::from_millis(10));
    Arc::new(SourceHttpClient::new(Arc::new(throttle)).unwrap())
}

#[tokio::test]
async fn test_federal_register_follows_next_page_url() {
    let base = fixture_server().await;
    let adapter = FederalRegisterAdapter::new(client(100, Duration::from_secs(1)), source_config(&base));

    let first = adapter.fetch(Domain::TradeUpdate, None).await.unwrap();
    assert_eq!(first.items.len(), 1);
    let cursor = first.next_cursor.clone().unwrap();
    assert!(cursor.ends_with("/documents.json?page=2"));

    let second = adapter
        .fetch(Domain::TradeUpdate, Some(&cursor))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(second.next_cursor.is_none());

    let (records, failures) = adapter.normalize(Domain::TradeUpdate, &first, Utc::now());
    assert!(failures.is_empty());
    let record = &records[0];
    assert_eq!(record.source_id, SourceId::FederalRegister);
    assert_eq!(record.external_id, "2024-00001");
    assert_eq!(record.field_str("kind"), Some("notice"));
    assert_eq!(record.field_str("publishedAt"), Some("2024-05-14"));
    assert_eq!(
        record.payload["agencies"],
        json!(["Office of the United States Trade Representative"])
    );
}

#[tokio::test]
async fn test_http_error_status_maps_to_source_error() {
    let base = fixture_server().await;
    let adapter = CustomsRulingsAdapter::new(client(100, Duration::from_secs(1)), source_config(&base));

    let err = adapter.fetch(Domain::TradeUpdate, None).await.unwrap_err();
    match &err {
        SyncError::SourceHttp {
            source_id,
            status,
            message,
        } => {
            assert_eq!(*source_id, SourceId::CustomsRulings);
            assert_eq!(*status, 503);
            assert!(message.contains("maintenance"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_source_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let adapter = FederalRegisterAdapter::new(client(100, Duration::from_secs(1)), source_config(&base));
    let err = adapter.fetch(Domain::TradeUpdate, None).await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable { .. }));
}

#[tokio::test]
async fn test_outbound_limit_gives_up_after_max_wait() {
    let base = fixture_server().await;
    let adapter = FederalRegisterAdapter::new(client(1, Duration::from_millis(30)), source_config(&base));

    adapter.fetch(Domain::TradeUpdate, None).await.unwrap();
    let err = adapter.fetch(Domain::TradeUpdate, None).await.unwrap_err();
    match err {
        SyncError::RateLimited { key } => assert_eq!(key, "source:federal_register"),
        other => panic!("unexpected error: {other:?}"),
    }
}
