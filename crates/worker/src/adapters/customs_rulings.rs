use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tradesync_core::config::SourceConfig;
use tradesync_core::models::{Domain, Payload, SourceId, SourceRecord};
use tradesync_core::traits::{RawBatch, SourceAdapter};
use tradesync_core::{SyncError, SyncResult};

use super::{endpoint, items_of, next_page, optional, parse_page, required_str, SourceHttpClient};

const DOMAINS: [Domain; 1] = [Domain::TradeUpdate];

/// 海关裁定，作为贸易动态入库
pub struct CustomsRulingsAdapter {
    client: Arc<SourceHttpClient>,
    config: SourceConfig,
}

impl CustomsRulingsAdapter {
    pub fn new(client: Arc<SourceHttpClient>, config: SourceConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl SourceAdapter for CustomsRulingsAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::CustomsRulings
    }

    fn domains(&self) -> &[Domain] {
        &DOMAINS
    }

    async fn fetch(&self, domain: Domain, cursor: Option<&str>) -> SyncResult<RawBatch> {
        if domain != Domain::TradeUpdate {
            return Err(SyncError::Internal(format!("海关裁定数据源不提供 {domain} 领域")));
        }
        let page = parse_page(cursor)?;
        let body = self
            .client
            .get_json(
                self.source_id(),
                &endpoint(&self.config, "rulings"),
                &[
                    ("page", page.to_string()),
                    ("pageSize", self.config.page_size.to_string()),
                    ("sortBy", "DATE_DESC".to_string()),
                ],
                Duration::from_secs(self.config.request_timeout_seconds),
            )
            .await?;

        let items = items_of(&body, "rulings", self.source_id())?;
        let total_pages = body.get("totalPages").and_then(Value::as_u64);
        Ok(RawBatch {
            next_cursor: next_page(page, total_pages, items.len(), self.config.page_size),
            items,
        })
    }

    fn normalize_item(
        &self,
        domain: Domain,
        raw: &Value,
        fetched_at: DateTime<Utc>,
    ) -> SyncResult<SourceRecord> {
        let external_id = required_str(raw, "rulingNumber", "<unknown>")?;
        let subject = required_str(raw, "subject", &external_id)?;

        let mut payload = Payload::new();
        payload.insert("kind".to_string(), json!("ruling"));
        payload.insert("title".to_string(), json!(subject));
        payload.insert("publishedAt".to_string(), optional(raw, "rulingDate"));
        payload.insert("htsCodes".to_string(), optional(raw, "tariffs"));
        payload.insert("category".to_string(), optional(raw, "collection"));
        payload.insert("url".to_string(), optional(raw, "url"));
        Ok(SourceRecord::new(
            self.source_id(),
            external_id,
            domain,
            payload,
            fetched_at,
        ))
    }
}
