use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tradesync_core::config::SourceConfig;
use tradesync_core::models::{Domain, Payload, SourceId, SourceRecord};
use tradesync_core::traits::{RawBatch, SourceAdapter};
use tradesync_core::{SyncError, SyncResult};

use super::{endpoint, items_of, normalization_error, optional, required_rate, required_str, SourceHttpClient};

const DOMAINS: [Domain; 2] = [Domain::Product, Domain::TariffRate];

/// 关税税则（HTS）数据源：商品分类与按国家的税率，按偏移量分页
pub struct TariffScheduleAdapter {
    client: Arc<SourceHttpClient>,
    config: SourceConfig,
}

impl TariffScheduleAdapter {
    pub fn new(client: Arc<SourceHttpClient>, config: SourceConfig) -> Self {
        Self { client, config }
    }

    fn path(domain: Domain) -> SyncResult<&'static str> {
        match domain {
            Domain::Product => Ok("products"),
            Domain::TariffRate => Ok("rates"),
            other => Err(SyncError::Internal(format!(
                "关税税则数据源不提供 {other} 领域"
            ))),
        }
    }

    fn normalize_product(raw: &Value) -> SyncResult<(String, Payload)> {
        let external_id = required_str(raw, "htsno", "<unknown>")?;
        let description = required_str(raw, "description", &external_id)?;

        let mut payload = Payload::new();
        payload.insert("htsCode".to_string(), json!(external_id));
        payload.insert("description".to_string(), json!(description));
        payload.insert("units".to_string(), optional(raw, "units"));
        payload.insert("indent".to_string(), optional(raw, "indent"));
        payload.insert("generalRateText".to_string(), optional(raw, "general"));
        Ok((external_id, payload))
    }

    fn normalize_rate(raw: &Value) -> SyncResult<(String, Payload)> {
        let hts_code = required_str(raw, "htsno", "<unknown>")?;
        let country = required_str(raw, "countryCode", &hts_code)?.to_ascii_uppercase();
        let external_id = format!("{hts_code}-{country}");
        let effective_date = required_str(raw, "effectiveDate", &external_id)?;

        let base_rate = required_rate(raw, "general", &external_id)?;
        let additional_rate = match raw.get("additional") {
            None | Some(Value::Null) => 0.0,
            Some(_) => required_rate(raw, "additional", &external_id)?,
        };
        if country.len() != 2 {
            return Err(normalization_error(&external_id, format!("无效的国家代码: {country}")));
        }

        let mut payload = Payload::new();
        payload.insert("htsCode".to_string(), json!(hts_code));
        payload.insert("countryCode".to_string(), json!(country));
        payload.insert("baseRate".to_string(), json!(base_rate));
        payload.insert("additionalRate".to_string(), json!(additional_rate));
        payload.insert("totalRate".to_string(), json!(base_rate + additional_rate));
        payload.insert("effectiveDate".to_string(), json!(effective_date));
        Ok((external_id, payload))
    }
}

#[async_trait]
impl SourceAdapter for TariffScheduleAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::TariffSchedule
    }

    fn domains(&self) -> &[Domain] {
        &DOMAINS
    }

    async fn fetch(&self, domain: Domain, cursor: Option<&str>) -> SyncResult<RawBatch> {
        let offset: u64 = match cursor {
            None => 0,
            Some(c) => c
                .parse()
                .map_err(|_| SyncError::Internal(format!("无效的偏移量游标: {c}")))?,
        };
        let url = endpoint(&self.config, Self::path(domain)?);
        let body = self
            .client
            .get_json(
                self.source_id(),
                &url,
                &[
                    ("offset", offset.to_string()),
                    ("limit", self.config.page_size.to_string()),
                ],
                Duration::from_secs(self.config.request_timeout_seconds),
            )
            .await?;

        let items = items_of(&body, "items", self.source_id())?;
        let next = offset + items.len() as u64;
        let has_more = match body.get("total").and_then(Value::as_u64) {
            Some(total) => next < total,
            None => items.len() >= self.config.page_size as usize,
        };
        Ok(RawBatch {
            next_cursor: (has_more && !items.is_empty()).then(|| next.to_string()),
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
            Domain::Product => Self::normalize_product(raw)?,
            Domain::TariffRate => Self::normalize_rate(raw)?,
            other => {
                return Err(SyncError::Internal(format!(
                    "关税税则数据源不提供 {other} 领域"
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
