use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::SyncError;

/// 规范化后的字段集合，键有序以保证摘要稳定
pub type Payload = BTreeMap<String, serde_json::Value>;

/// 外部政府数据源标识
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// 关税税则主管机构（HTS）
    TariffSchedule,
    /// 贸易代表办公室政策公告
    TradeRepresentative,
    /// 海关裁定
    CustomsRulings,
    /// 联邦公报通知
    FederalRegister,
}

impl SourceId {
    pub const ALL: [SourceId; 4] = [
        SourceId::TariffSchedule,
        SourceId::TradeRepresentative,
        SourceId::CustomsRulings,
        SourceId::FederalRegister,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::TariffSchedule => "tariff_schedule",
            SourceId::TradeRepresentative => "trade_representative",
            SourceId::CustomsRulings => "customs_rulings",
            SourceId::FederalRegister => "federal_register",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| SyncError::Configuration(format!("未知的数据源: {s}")))
    }
}

/// 同步领域，每个领域对应一个队列
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Product,
    TariffRate,
    TradeUpdate,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Product, Domain::TariffRate, Domain::TradeUpdate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Product => "product",
            Domain::TariffRate => "tariff_rate",
            Domain::TradeUpdate => "trade_update",
        }
    }

    /// 该领域任务所在的队列名
    pub fn queue_name(&self) -> &'static str {
        match self {
            Domain::Product => crate::models::PRODUCTS_QUEUE,
            Domain::TariffRate => crate::models::TARIFF_RATES_QUEUE,
            Domain::TradeUpdate => crate::models::TRADE_UPDATES_QUEUE,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条规范化的外部数据，仅在一次抓取到对账之间存在
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub source_id: SourceId,
    pub external_id: String,
    pub domain: Domain,
    pub payload: Payload,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(
        source_id: SourceId,
        external_id: impl Into<String>,
        domain: Domain,
        payload: Payload,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let content_hash = content_hash(&payload);
        Self {
            source_id,
            external_id: external_id.into(),
            domain,
            payload,
            content_hash,
            fetched_at,
        }
    }

    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}

/// 计算负载摘要：对键有序的JSON做SHA-256
pub fn content_hash(payload: &Payload) -> String {
    // BTreeMap 序列化天然按键排序；嵌套对象由 serde_json 的默认 Map 保证有序
    let canonical = serde_json::to_vec(payload).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(rate: f64) -> Payload {
        let mut p = Payload::new();
        p.insert("htsCode".to_string(), json!("8471.30.01"));
        p.insert("totalRate".to_string(), json!(rate));
        p
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = SourceRecord::new(
            SourceId::TariffSchedule,
            "8471.30.01",
            Domain::Product,
            payload(7.5),
            Utc::now(),
        );
        let b = SourceRecord::new(
            SourceId::TariffSchedule,
            "8471.30.01",
            Domain::Product,
            payload(7.5),
            Utc::now(),
        );
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);

        let c = SourceRecord::new(
            SourceId::TariffSchedule,
            "8471.30.01",
            Domain::Product,
            payload(10.0),
            Utc::now(),
        );
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[test]
    fn test_source_id_round_trip_names() {
        for id in SourceId::ALL {
            assert_eq!(id.as_str().parse::<SourceId>().unwrap(), id);
        }
        assert!("unknown".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_domain_queue_names() {
        assert_eq!(Domain::Product.queue_name(), "products");
        assert_eq!(Domain::TariffRate.queue_name(), "tariff-rates");
        assert_eq!(Domain::TradeUpdate.queue_name(), "trade-updates");
    }
}
