use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tradesync_core::config::SourceConfig;
use tradesync_core::models::{Domain, Payload, SourceId, SourceRecord};
use tradesync_core::traits::{RawBatch, SourceAdapter};
use tradesync_core::{SyncError, SyncResult};

use super::{
    endpoint, items_of, next_page, optional, parse_page, required_rate, required_str,
    SourceHttpClient,
};

const DOMAINS: [Domain; 2] = [Domain::TariffRate, Domain::TradeUpdate];

/// 贸易代表办公室：加征关税措施与政策公告，按页码分页
pub struct TradeRepresentativeAdapter {
    client: Arc<SourceHttpClient>,
    config: SourceConfig,
}

impl TradeRepresentativeAdapter {
    pub fn new(client: Arc<SourceHttpClient>, config: SourceConfig) -> Self {
        Self { client, config }
    }

    fn path(domain: Domain) -> SyncResult<&'static str> {
        match domain {
            Domain::TariffRate => Ok("tariff-actions"),
            Domain::TradeUpdate => Ok("policy-updates"),
            other => Err(SyncError::Internal(format!(
                "贸易代表数据源不提供 {other} 领域"
            ))),
        }
    }

    fn normalize_action(raw: &Value) -> SyncResult<(String, Payload)> {
        let external_id = required_str(raw, "id", "<unknown>")?;
        let hts_code = required_str(raw, "htsCode", &external_id)?;
        let country = required_str(raw, "countryCode", &external_id)?.to_ascii_uppercase();
        let rate = required_rate(raw, "actionRate", &external_id)?;
        let effective_date = required_str(raw, "effectiveDate", &external_id)?;

        let mut payload = Payload::new();
        payload.insert("htsCode".to_string(), json!(hts_code));
        payload.insert("countryCode".to_string(), json!(country));
        payload.insert("totalRate".to_string(), json!(rate));
        payload.insert("program".to_string(), optional(raw, "actionType"));
        payload.insert("effectiveDate".to_string(), json!(effective_date));
        Ok((external_id, payload))
    }

    fn normalize_policy(raw: &Value) -> SyncResult<(String, Payload)> {
        let external_id = required_str(raw, "id", "<unknown>")?;
        let title = required_str(raw, "title", &external_id)?;

        let mut payload = Payload::new();
        payload.insert("kind".to_string(), json!("policy"));
        payload.insert("title".to_string(), json!(title));
        payload.insert("summary".to_string(), optional(raw, "summary"));
        payload.insert("publishedAt".to_string(), optional(raw, "publishedDate"));
        payload.insert("category".to_string(), optional(raw, "category"));
        payload.insert("url".to_string(), optional(raw, "url"));
        Ok((external_id, payload))
    }
}

#[async_trait]
impl SourceAdapter for TradeRepresentativeAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::TradeRepresentative
    }

    fn domains(&self) -> &[Domain] {
        &DOMAINS
    }

    async fn fetch(&self, domain: Domain, cursor: Option<&str>) -> SyncResult<RawBatch> {
        let page = parse_page(cursor)?;
        let url = endpoint(&self.config, Self::path(domain)?);
        let body = self
            .client
            .get_json(
                self.source_id(),
                &url,
                &[
                    ("page", page.to_string()),
                    ("per_page", self.config.page_size.to_string()),
                ],
                Duration::from_secs(self.config.request_timeout_seconds),
            )
            .await?;

        let items = items_of(&body, "results", self.source_id())?;
        let total_pages = body.get("total_pages").and_then(Value::as_u64);
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
        let (external_id, payload) = match domain {
            Domain::TariffRate => Self::normalize_action(raw)?,
            Domain::TradeUpdate => Self::normalize_policy(raw)?,
            other => {
                return Err(SyncError::Internal(format!(
                    "贸易代表数据源不提供 {other} 领域"
                )))
            }
        };
        Ok(SourceRecord::new(
            self.source_id(),
            external_id,
            domain,
            payload,
            fetched_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_action() {
        let raw = json!({
            "id": "301-list-4a-123",
            "htsCode": "8517.62.00",
            "countryCode": "CN",
            "actionRate": "7.5%",
            "actionType": "section_301",
            "effectiveDate": "2020-02-14"
        });
        let (id, payload) = TradeRepresentativeAdapter::normalize_action(&raw).unwrap();
        assert_eq!(id, "301-list-4a-123");
        assert_eq!(payload["totalRate"], json!(7.5));
        assert_eq!(payload["program"], json!("section_301"));
    }

    #[test]
    fn test_numeric_id_is_accepted() {
        let raw = json!({"id": 4312, "title": "Four-year review"});
        let (id, payload) = TradeRepresentativeAdapter::normalize_policy(&raw).unwrap();
        assert_eq!(id, "4312");
        assert_eq!(payload["kind"], json!("policy"));
        assert_eq!(payload["summary"], Value::Null);
    }
}
