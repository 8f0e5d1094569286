use crate::config::models::{AppConfig, QueueBackend, RateLimitBackend};
use crate::models::SourceId;

fn valid_default() -> AppConfig {
    let mut config = AppConfig::default();
    config.api.operator_key = "ops-secret".to_string();
    config
}

#[test]
fn test_default_config() {
    let config = valid_default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.queue.default_attempts, 3);
    assert_eq!(config.queue.backoff_base_ms, 5_000);
    assert_eq!(config.queue.max_stalled_count, 1);
    assert_eq!(config.rate_limit.inbound.window_ms, 60_000);
    assert_eq!(config.rate_limit.inbound.max_requests, 100);
    assert!(config.rate_limit.fail_open);
    assert_eq!(config.queue.backend, QueueBackend::Memory);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
backend = "sqlite"
url = "sqlite::memory:"

[queue]
backend = "redis"
default_attempts = 5
backoff_base_ms = 1000
backoff_max_ms = 8000

[queue.redis]
host = "redis.internal"
port = 6380
key_prefix = "ts-test"

[queue.concurrency]
products = 4
cleanup = 1

[sources.federal_register]
enabled = false

[sources.customs_rulings]
base_url = "http://rulings.test"
priority = 99

[rate_limit]
backend = "redis"
fail_open = false

[rate_limit.outbound]
window_ms = 1000
max_requests = 5

[sync]
schedule = "0 0 3 * * *"
run_timeout_seconds = 900

[api]
bind_address = "127.0.0.1:9090"
operator_key = "k"

[observability]
log_level = "debug"
log_format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.queue.backend, QueueBackend::Redis);
    assert_eq!(config.queue.default_attempts, 5);
    assert_eq!(config.queue.redis.host, "redis.internal");
    assert_eq!(config.queue.redis.key_prefix, "ts-test");
    assert_eq!(config.queue.concurrency_for("products"), 4);
    assert_eq!(config.queue.concurrency_for("tariff-rates"), 1);
    assert_eq!(config.rate_limit.backend, RateLimitBackend::Redis);
    assert!(!config.rate_limit.fail_open);
    assert_eq!(config.rate_limit.outbound.max_requests, 5);
    assert_eq!(config.sync.schedule.as_deref(), Some("0 0 3 * * *"));
    assert_eq!(config.sources.get(SourceId::CustomsRulings).priority, 99);

    let enabled: Vec<SourceId> = config.sources.enabled().map(|(id, _)| id).collect();
    assert_eq!(enabled.len(), 3);
    assert!(!enabled.contains(&SourceId::FederalRegister));
}

#[test]
fn test_config_to_toml_skips_secrets() {
    let mut config = valid_default();
    config.queue.redis.password = Some("hunter2".to_string());
    let toml_str = config.to_toml().unwrap();

    assert!(!toml_str.contains("hunter2"));
    assert!(!toml_str.contains("ops-secret"));
}

#[test]
fn test_redis_url_redaction() {
    let mut config = valid_default();
    config.queue.redis.password = Some("hunter2".to_string());
    assert_eq!(
        config.queue.redis.build_url(),
        "redis://:hunter2@127.0.0.1:6379/0"
    );
    assert_eq!(
        config.queue.redis.redacted_url(),
        "redis://***@127.0.0.1:6379/0"
    );
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tradesync.toml");
    std::fs::write(
        &path,
        r#"
[api]
operator_key = "from-file"

[queue]
default_attempts = 7
"#,
    )
    .unwrap();

    let config = AppConfig::load(path.to_str()).unwrap();
    assert_eq!(config.queue.default_attempts, 7);
    assert_eq!(config.api.operator_key, "from-file");
}

#[test]
fn test_load_missing_file_fails() {
    assert!(AppConfig::load(Some("/nonexistent/tradesync.toml")).is_err());
}
