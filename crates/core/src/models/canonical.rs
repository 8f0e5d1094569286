use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{Domain, Payload, SourceId, SourceRecord};
use crate::errors::{SyncError, SyncResult};

/// 规范库中的实体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Product,
    TariffRate,
    TradeUpdate,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::TariffRate => "tariff_rate",
            EntityType::TradeUpdate => "trade_update",
        }
    }

    /// 税率按生效日期只追加，其它实体原地更新
    pub fn is_append_only(&self) -> bool {
        matches!(self, EntityType::TariffRate)
    }
}

impl From<Domain> for EntityType {
    fn from(domain: Domain) -> Self {
        match domain {
            Domain::Product => EntityType::Product,
            Domain::TariffRate => EntityType::TariffRate,
            Domain::TradeUpdate => EntityType::TradeUpdate,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(EntityType::Product),
            "tariff_rate" => Ok(EntityType::TariffRate),
            "trade_update" => Ok(EntityType::TradeUpdate),
            other => Err(SyncError::Serialization(format!("未知的实体类型: {other}"))),
        }
    }
}

/// 生效日期在负载中的字段名
pub const EFFECTIVE_DATE_FIELD: &str = "effectiveDate";

/// 对账使用的自然键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub entity_type: EntityType,
    pub key: String,
}

impl NaturalKey {
    /// 根据记录所属领域推导自然键
    pub fn for_record(record: &SourceRecord) -> SyncResult<Self> {
        let entity_type = EntityType::from(record.domain);
        let key = match entity_type {
            EntityType::Product => required(record, "htsCode")?.to_string(),
            EntityType::TariffRate => format!(
                "{}:{}",
                required(record, "htsCode")?,
                required(record, "countryCode")?
            ),
            EntityType::TradeUpdate => {
                if record.external_id.trim().is_empty() {
                    return Err(SyncError::Normalization {
                        external_id: record.external_id.clone(),
                        message: "外部ID为空".to_string(),
                    });
                }
                format!("{}:{}", record.source_id, record.external_id)
            }
        };
        Ok(Self { entity_type, key })
    }

    pub fn tariff_rate(hts_code: &str, country_code: &str) -> Self {
        Self {
            entity_type: EntityType::TariffRate,
            key: format!("{hts_code}:{country_code}"),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.key)
    }
}

fn required<'a>(record: &'a SourceRecord, field: &str) -> SyncResult<&'a str> {
    record
        .field_str(field)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SyncError::Normalization {
            external_id: record.external_id.clone(),
            message: format!("缺少字段 {field}"),
        })
}

/// 规范库中持久化的一行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub id: i64,
    pub entity_type: EntityType,
    pub natural_key: String,
    pub source_id: SourceId,
    pub source_priority: i32,
    pub effective_date: Option<NaiveDate>,
    pub fields: Payload,
    pub content_hash: String,
    /// 写入时作为比较基线的版本；同一内容只能在同一基线之上出现一次
    pub supersedes: Option<i64>,
    pub run_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待写入的规范行
#[derive(Debug, Clone, PartialEq)]
pub struct NewCanonicalRecord {
    pub entity_type: EntityType,
    pub natural_key: String,
    pub source_id: SourceId,
    pub source_priority: i32,
    pub effective_date: Option<NaiveDate>,
    pub fields: Payload,
    pub content_hash: String,
    pub supersedes: Option<i64>,
    pub run_id: Option<Uuid>,
}

impl NewCanonicalRecord {
    pub fn into_record(self, id: i64, now: DateTime<Utc>) -> CanonicalRecord {
        CanonicalRecord {
            id,
            entity_type: self.entity_type,
            natural_key: self.natural_key,
            source_id: self.source_id,
            source_priority: self.source_priority,
            effective_date: self.effective_date,
            fields: self.fields,
            content_hash: self.content_hash,
            supersedes: self.supersedes,
            run_id: self.run_id,
            recorded_at: now,
            updated_at: now,
        }
    }
}

/// 版本排序：生效日期 → 数据源优先级 → 写入顺序
pub fn version_order(a: &CanonicalRecord, b: &CanonicalRecord) -> Ordering {
    a.effective_date
        .cmp(&b.effective_date)
        .then(a.source_priority.cmp(&b.source_priority))
        .then(a.id.cmp(&b.id))
}

/// 在给定日期选出“当前”版本：生效日期不晚于该日期的最新版本
pub fn select_current<'a, I>(rows: I, as_of: NaiveDate) -> Option<&'a CanonicalRecord>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    rows.into_iter()
        .filter(|row| row.effective_date.map_or(true, |d| d <= as_of))
        .max_by(|a, b| version_order(a, b))
}
