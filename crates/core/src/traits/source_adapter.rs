use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Domain, SourceId, SourceRecord};
use crate::{SyncError, SyncResult};

/// 一页原始数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub items: Vec<Value>,
    /// 下一页游标，`None` 表示已到末尾
    pub next_cursor: Option<String>,
}

/// 单条原始数据规范化失败
#[derive(Debug)]
pub struct ItemFailure {
    pub external_id: String,
    pub error: SyncError,
}

/// 外部数据源适配器
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> SourceId;

    /// 该数据源能提供的领域
    fn domains(&self) -> &[Domain];

    /// 抓取一页原始数据；`cursor` 为上次返回的游标，可断点续传。
    /// 每次外部调用前都必须经过出站限流
    async fn fetch(&self, domain: Domain, cursor: Option<&str>) -> SyncResult<RawBatch>;

    /// 规范化单条原始数据，必须是纯函数
    fn normalize_item(
        &self,
        domain: Domain,
        raw: &Value,
        fetched_at: DateTime<Utc>,
    ) -> SyncResult<SourceRecord>;

    /// 规范化整批数据，单条失败不影响其余记录
    fn normalize(
        &self,
        domain: Domain,
        batch: &RawBatch,
        fetched_at: DateTime<Utc>,
    ) -> (Vec<SourceRecord>, Vec<ItemFailure>) {
        let mut records = Vec::with_capacity(batch.items.len());
        let mut failures = Vec::new();
        for raw in &batch.items {
            match self.normalize_item(domain, raw, fetched_at) {
                Ok(record) => records.push(record),
                Err(error) => failures.push(ItemFailure {
                    external_id: raw_identifier(raw),
                    error,
                }),
            }
        }
        (records, failures)
    }
}

fn raw_identifier(raw: &Value) -> String {
    ["id", "externalId", "document_number", "htsno", "rulingNumber"]
        .iter()
        .find_map(|k| raw.get(*k))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// 启动时构建的适配器注册表，按数据源标识索引
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<SourceId, RegisteredSource>,
}

#[derive(Clone)]
struct RegisteredSource {
    adapter: Arc<dyn SourceAdapter>,
    priority: i32,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>, priority: i32) {
        self.adapters
            .insert(adapter.source_id(), RegisteredSource { adapter, priority });
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>, priority: i32) -> Self {
        self.register(adapter, priority);
        self
    }

    pub fn get(&self, source: SourceId) -> SyncResult<Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&source)
            .map(|entry| entry.adapter.clone())
            .ok_or(SyncError::SourceNotRegistered(source))
    }

    /// 数据源优先级，未注册时为 0
    pub fn priority(&self, source: SourceId) -> i32 {
        self.adapters.get(&source).map_or(0, |entry| entry.priority)
    }

    /// 全部已注册数据源的优先级表
    pub fn priorities(&self) -> BTreeMap<SourceId, i32> {
        self.adapters
            .iter()
            .map(|(id, entry)| (*id, entry.priority))
            .collect()
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.adapters.keys().copied().collect()
    }

    /// 所有已注册的 (数据源, 领域) 组合
    pub fn pairs(&self) -> Vec<(SourceId, Domain)> {
        self.adapters
            .iter()
            .flat_map(|(id, entry)| entry.adapter.domains().iter().map(move |d| (*id, *d)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use serde_json::json;

    struct StaticAdapter;

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source_id(&self) -> SourceId {
            SourceId::CustomsRulings
        }

        fn domains(&self) -> &[Domain] {
            &[Domain::TradeUpdate]
        }

        async fn fetch(&self, _domain: Domain, _cursor: Option<&str>) -> SyncResult<RawBatch> {
            Ok(RawBatch::default())
        }

        fn normalize_item(
            &self,
            domain: Domain,
            raw: &Value,
            fetched_at: DateTime<Utc>,
        ) -> SyncResult<SourceRecord> {
            let id = raw
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| SyncError::Normalization {
                    external_id: raw_identifier(raw),
                    message: "缺少id".to_string(),
                })?;
            let mut payload = Payload::new();
            payload.insert("title".to_string(), raw["title"].clone());
            Ok(SourceRecord::new(self.source_id(), id, domain, payload, fetched_at))
        }
    }

    #[test]
    fn test_normalize_keeps_going_after_bad_item() {
        let batch = RawBatch {
            items: vec![
                json!({"id": "N1", "title": "a"}),
                json!({"rulingNumber": 42}),
                json!({"id": "N3", "title": "c"}),
            ],
            next_cursor: None,
        };
        let (records, failures) =
            StaticAdapter.normalize(Domain::TradeUpdate, &batch, Utc::now());
        assert_eq!(records.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].external_id, "42");
    }

    #[test]
    fn test_registry_pairs_and_priority() {
        let registry = SourceRegistry::new().with(Arc::new(StaticAdapter), 7);
        assert_eq!(
            registry.pairs(),
            vec![(SourceId::CustomsRulings, Domain::TradeUpdate)]
        );
        assert_eq!(registry.priority(SourceId::CustomsRulings), 7);
        assert_eq!(registry.priority(SourceId::FederalRegister), 0);
        assert!(matches!(
            registry.get(SourceId::FederalRegister),
            Err(SyncError::SourceNotRegistered(SourceId::FederalRegister))
        ));
    }
}
