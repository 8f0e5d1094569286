use crate::config::models::{AppConfig, QueueBackend};

fn valid() -> AppConfig {
    let mut config = AppConfig::default();
    config.api.operator_key = "ops-secret".to_string();
    config
}

#[test]
fn test_missing_operator_key_rejected() {
    let config = AppConfig::default();
    assert!(config.validate().is_err());

    let mut api_disabled = AppConfig::default();
    api_disabled.api.enabled = false;
    assert!(api_disabled.validate().is_ok());
}

#[test]
fn test_trusted_proxy_validation() {
    let mut config = valid();
    config.api.trusted_proxies = vec!["10.0.0.1".to_string(), "::1".to_string()];
    assert!(config.validate().is_ok());
    assert_eq!(config.api.trusted_proxy_addrs().len(), 2);

    config.api.trusted_proxies.push("load-balancer".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn test_queue_validation() {
    let mut config = valid();
    config.queue.default_attempts = 0;
    assert!(config.validate().is_err());

    let mut config = valid();
    config.queue.backoff_max_ms = 1_000;
    assert!(config.validate().is_err());

    let mut config = valid();
    config.queue.concurrency.insert("products".to_string(), 0);
    assert!(config.validate().is_err());

    let mut config = valid();
    config.queue.concurrency.insert("unknown".to_string(), 1);
    assert!(config.validate().is_err());

    let mut config = valid();
    config.queue.backend = QueueBackend::Redis;
    config.queue.redis.host = String::new();
    assert!(config.validate().is_err());

    let mut config = valid();
    config.queue.redis.port = 0;
    config.queue.backend = QueueBackend::Redis;
    assert!(config.validate().is_err());
}

#[test]
fn test_rate_limit_validation() {
    let mut config = valid();
    config.rate_limit.inbound.window_ms = 0;
    assert!(config.validate().is_err());

    let mut config = valid();
    config.rate_limit.outbound.max_requests = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_source_and_schedule_validation() {
    let mut config = valid();
    config.sources.tariff_schedule.base_url = "ftp://hts".to_string();
    assert!(config.validate().is_err());

    // 禁用的数据源不做校验
    config.sources.tariff_schedule.enabled = false;
    assert!(config.validate().is_ok());

    let mut config = valid();
    config.sync.schedule = Some("not a cron".to_string());
    assert!(config.validate().is_err());

    config.sync.schedule = Some("0 */30 * * * *".to_string());
    assert!(config.validate().is_ok());
}

#[test]
fn test_observability_validation() {
    let mut config = valid();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());

    config.observability.log_level = "WARN".to_string();
    assert!(config.validate().is_ok());
}
