use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::canonical::EntityType;

/// 新建实体时事件使用的字段名
pub const CREATED_FIELD: &str = "*";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(ChangeKind::Created),
            "updated" => Some(ChangeKind::Updated),
            _ => None,
        }
    }
}

/// 对账产生的变更事件，供下游通知消费者使用（至少一次投递）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: ChangeKind,
    pub field: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub detected_at: DateTime<Utc>,
    pub run_id: Option<Uuid>,
}

impl ChangeEvent {
    pub fn created(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        snapshot: serde_json::Value,
        detected_at: DateTime<Utc>,
        run_id: Option<Uuid>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            kind: ChangeKind::Created,
            field: CREATED_FIELD.to_string(),
            old_value: None,
            new_value: Some(snapshot),
            detected_at,
            run_id,
        }
    }

    pub fn updated(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        field: impl Into<String>,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
        detected_at: DateTime<Utc>,
        run_id: Option<Uuid>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            kind: ChangeKind::Updated,
            field: field.into(),
            old_value,
            new_value,
            detected_at,
            run_id,
        }
    }

    /// 通知方去重使用的幂等键 `(entityId, field, detectedAt)`
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.entity_id,
            self.field,
            self.detected_at.timestamp_micros()
        )
    }
}
