use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tradesync_core::config::SourceConfig;
use tradesync_core::models::{Domain, Payload, SourceId, SourceRecord};
use tradesync_core::traits::{RawBatch, SourceAdapter};
use tradesync_core::{SyncError, SyncResult};

use super::{endpoint, items_of, optional, required_str, SourceHttpClient};

const DOMAINS: [Domain; 1] = [Domain::TradeUpdate];

/// 联邦公报中与关税相关的通知。游标为响应给出的 `next_page_url`
pub struct FederalRegisterAdapter {
    client: Arc<SourceHttpClient>,
    config: SourceConfig,
}

impl FederalRegisterAdapter {
    pub fn new(client: Arc<SourceHttpClient>, config: SourceConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl SourceAdapter for FederalRegisterAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::FederalRegister
    }

    fn domains(&self) -> &[Domain] {
        &DOMAINS
    }

    async fn fetch(&self, domain: Domain, cursor: Option<&str>) -> SyncResult<RawBatch> {
        if domain != Domain::TradeUpdate {
            return Err(SyncError::Internal(format!("联邦公报数据源不提供 {domain} 领域")));
        }
        let timeout = Duration::from_secs(self.config.request_timeout_seconds);
        let body = match cursor {
            Some(next_url) => {
                self.client
                    .get_json(self.source_id(), next_url, &[], timeout)
                    .await?
            }
            None => {
                self.client
                    .get_json(
                        self.source_id(),
                        &endpoint(&self.config, "documents.json"),
                        &[
                            ("per_page", self.config.page_size.to_string()),
                            ("order", "newest".to_string()),
                            ("conditions[term]", "tariff".to_string()),
                        ],
                        timeout,
                    )
                    .await?
            }
        };

        let items = items_of(&body, "results", self.source_id())?;
        let next_cursor = body
            .get("next_page_url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty() && !items.is_empty())
            .map(str::to_string);
        Ok(RawBatch { items, next_cursor })
    }

    fn normalize_item(
        &self,
        domain: Domain,
        raw: &Value,
        fetched_at: DateTime<Utc>,
    ) -> SyncResult<SourceRecord> {
        let external_id = required_str(raw, "document_number", "<unknown>")?;
        let title = required_str(raw, "title", &external_id)?;

        let agencies: Vec<Value> = raw
            .get("agencies")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|agency| agency.get("name").cloned())
                    .collect()
            })
            .unwrap_or_default();

        let mut payload = Payload::new();
        payload.insert("kind".to_string(), json!("notice"));
        payload.insert("title".to_string(), json!(title));
        payload.insert("summary".to_string(), optional(raw, "abstract"));
        payload.insert("publishedAt".to_string(), optional(raw, "publication_date"));
        payload.insert("category".to_string(), optional(raw, "type"));
        payload.insert("url".to_string(), optional(raw, "html_url"));
        payload.insert("agencies".to_string(), Value::Array(agencies));
        Ok(SourceRecord::new(
            self.source_id(),
            external_id,
            domain,
            payload,
            fetched_at,
        ))
    }
}
