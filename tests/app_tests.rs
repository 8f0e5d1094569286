use std::time::Duration;

use chrono::Utc;
use tradesync::{AppMode, Application, ShutdownManager};
use tradesync_core::config::AppConfig;
use tradesync_core::models::{SourceId, SyncRunStatus, CLEANUP_QUEUE};
use uuid::Uuid;

const BASE_CONFIG: &str = r#"
[database]
backend = "memory"

[queue]
backend = "memory"
default_attempts = 1
poll_interval_ms = 20

[sources.tariff_schedule]
enabled = false

[sources.trade_representative]
enabled = false

[sources.customs_rulings]
enabled = false

[api]
enabled = false

[observability]
metrics_enabled = false
"#;

fn load_config(extra: &str) -> (tempfile::TempDir, AppConfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tradesync.toml");
    std::fs::write(&path, format!("{BASE_CONFIG}\n{extra}")).unwrap();
    let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
    (dir, config)
}

async fn wait_for_final(app: &Application, run_id: Uuid) -> tradesync_core::models::SyncRun {
    for _ in 0..200 {
        let run = app.orchestrator().get_status(run_id).await.unwrap();
        if run.status.is_final() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("同步运行未在预期时间内结束");
}

#[tokio::test]
async fn test_missing_config_file_is_rejected() {
    let result = AppConfig::load(Some("/nonexistent/tradesync.toml"));
    assert!(result.is_err());
}

#[tokio::test]
async fn test_unreachable_source_fails_run_end_to_end() {
    let (_dir, config) = load_config(
        r#"
[sources.federal_register]
base_url = "http://127.0.0.1:9"
"#,
    );
    assert!(!config.sources.tariff_schedule.enabled);

    let app = std::sync::Arc::new(Application::new(config, AppMode::All).await.unwrap());
    let shutdown = ShutdownManager::new();
    let handle = {
        let app = app.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { app.run(shutdown).await })
    };

    let run_id = app.orchestrator().trigger_full_sync().await.unwrap();
    let run = wait_for_final(&app, run_id).await;

    assert_eq!(run.status, SyncRunStatus::Failed);
    assert!(!run.failures.is_empty());
    assert!(run
        .failures
        .iter()
        .all(|failure| failure.source == Some(SourceId::FederalRegister)));

    shutdown.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_run_without_sources_completes_and_cleanup_runs() {
    let (_dir, config) = load_config(
        r#"
[sources.federal_register]
enabled = false
"#,
    );

    let app = std::sync::Arc::new(Application::new(config, AppMode::All).await.unwrap());
    let shutdown = ShutdownManager::new();
    let handle = {
        let app = app.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { app.run(shutdown).await })
    };

    let run_id = app.orchestrator().trigger_full_sync().await.unwrap();
    let run = wait_for_final(&app, run_id).await;
    assert_eq!(run.status, SyncRunStatus::Completed);
    assert!(run.job_ids.is_empty());

    let cleanup = app.queues().get(CLEANUP_QUEUE).unwrap();
    let mut completed = 0;
    for _ in 0..200 {
        completed = cleanup.counts(Utc::now()).await.unwrap().completed;
        if completed > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(completed, 1);

    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
