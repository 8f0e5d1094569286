//! 外部数据源适配器
//!
//! 每个数据源一个适配器，统一实现 [`SourceAdapter`]：
//! - `fetch` 经过出站限流抓取一页原始数据，返回下一页游标
//! - `normalize_item` 把原始条目转换为规范化记录，是纯函数
//!
//! 启动时由 [`build_registry`] 按配置注册启用的数据源。

mod customs_rulings;
mod federal_register;
mod http;
mod tariff_schedule;
mod trade_representative;

pub use customs_rulings::CustomsRulingsAdapter;
pub use federal_register::FederalRegisterAdapter;
pub use http::{OutboundThrottle, SourceHttpClient};
pub use tariff_schedule::TariffScheduleAdapter;
pub use trade_representative::TradeRepresentativeAdapter;

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use tradesync_core::config::{SourceConfig, SourcesConfig};
use tradesync_core::models::SourceId;
use tradesync_core::traits::{SourceAdapter, SourceRegistry};
use tradesync_core::{SyncError, SyncResult};

/// 按配置注册所有启用的数据源
pub fn build_registry(sources: &SourcesConfig, client: Arc<SourceHttpClient>) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    for (source, config) in sources.enabled() {
        let adapter: Arc<dyn SourceAdapter> = match source {
            SourceId::TariffSchedule => {
                Arc::new(TariffScheduleAdapter::new(client.clone(), config.clone()))
            }
            SourceId::TradeRepresentative => {
                Arc::new(TradeRepresentativeAdapter::new(client.clone(), config.clone()))
            }
            SourceId::CustomsRulings => {
                Arc::new(CustomsRulingsAdapter::new(client.clone(), config.clone()))
            }
            SourceId::FederalRegister => {
                Arc::new(FederalRegisterAdapter::new(client.clone(), config.clone()))
            }
        };
        info!(source = %source, base_url = %config.base_url, priority = config.priority, "注册数据源");
        registry.register(adapter, config.priority);
    }
    registry
}

pub(crate) fn endpoint(config: &SourceConfig, path: &str) -> String {
    format!("{}/{}", config.base_url.trim_end_matches('/'), path)
}

/// 把税率文本解析为百分比数值：`"7.5%"` → 7.5，`"Free"` → 0.0
pub fn parse_rate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => {
            let text = text.trim();
            if text.eq_ignore_ascii_case("free") {
                return Some(0.0);
            }
            text.strip_suffix('%')
                .unwrap_or(text)
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|rate| rate.is_finite() && *rate >= 0.0)
        }
        _ => None,
    }
}

pub(crate) fn normalization_error(external_id: &str, message: impl Into<String>) -> SyncError {
    SyncError::Normalization {
        external_id: external_id.to_string(),
        message: message.into(),
    }
}

/// 读取非空字符串字段；数字也按字符串接受
pub(crate) fn required_str(raw: &Value, field: &str, external_id: &str) -> SyncResult<String> {
    match raw.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(normalization_error(external_id, format!("缺少字段 {field}"))),
    }
}

pub(crate) fn optional(raw: &Value, field: &str) -> Value {
    raw.get(field).cloned().unwrap_or(Value::Null)
}

pub(crate) fn required_rate(raw: &Value, field: &str, external_id: &str) -> SyncResult<f64> {
    let value = raw
        .get(field)
        .ok_or_else(|| normalization_error(external_id, format!("缺少字段 {field}")))?;
    parse_rate(value)
        .ok_or_else(|| normalization_error(external_id, format!("无法解析税率 {field}: {value}")))
}

/// 页码游标：当前页不是最后一页时返回下一页
pub(crate) fn next_page(page: u64, total_pages: Option<u64>, items: usize, page_size: u32) -> Option<String> {
    let has_more = match total_pages {
        Some(total) => page < total,
        None => items >= page_size as usize,
    };
    (has_more && items > 0).then(|| (page + 1).to_string())
}

pub(crate) fn parse_page(cursor: Option<&str>) -> SyncResult<u64> {
    match cursor {
        None => Ok(1),
        Some(c) => c
            .parse::<u64>()
            .map_err(|_| SyncError::Internal(format!("无效的分页游标: {c}"))),
    }
}

/// 从响应对象中取出条目数组
pub(crate) fn items_of(body: &Value, field: &str, source: SourceId) -> SyncResult<Vec<Value>> {
    match body.get(field) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(SyncError::Serialization(format!(
            "数据源 {source} 的响应字段 {field} 不是数组"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rate_forms() {
        assert_eq!(parse_rate(&json!("7.5%")), Some(7.5));
        assert_eq!(parse_rate(&json!(" 25 % ")), Some(25.0));
        assert_eq!(parse_rate(&json!("Free")), Some(0.0));
        assert_eq!(parse_rate(&json!(10)), Some(10.0));
        assert_eq!(parse_rate(&json!("2.4¢/kg + 5%")), None);
        assert_eq!(parse_rate(&json!("")), None);
        assert_eq!(parse_rate(&json!(null)), None);
    }

    #[test]
    fn test_next_page() {
        assert_eq!(next_page(1, Some(3), 10, 10), Some("2".to_string()));
        assert_eq!(next_page(3, Some(3), 10, 10), None);
        assert_eq!(next_page(1, None, 10, 10), Some("2".to_string()));
        assert_eq!(next_page(1, None, 4, 10), None);
        assert_eq!(next_page(1, Some(5), 0, 10), None);
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let config = SourceConfig {
            base_url: "https://example.gov/api/".to_string(),
            ..SourceConfig::default()
        };
        assert_eq!(endpoint(&config, "rulings"), "https://example.gov/api/rulings");
    }
}
