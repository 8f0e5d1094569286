use serde::{Deserialize, Serialize};

use crate::models::SourceId;

/// 单个外部数据源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub base_url: String,
    /// 同一生效日期冲突时数值大者胜出
    pub priority: i32,
    pub page_size: u32,
    pub request_timeout_seconds: u64,
    pub max_pages: u32,
}

impl SourceConfig {
    fn with(base_url: &str, priority: i32) -> Self {
        Self {
            enabled: true,
            base_url: base_url.to_string(),
            priority,
            page_size: 100,
            request_timeout_seconds: 30,
            max_pages: 50,
        }
    }

    pub fn validate(&self, source: SourceId) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(anyhow::anyhow!(
                "数据源 {source} 的base_url格式错误: {}",
                self.base_url
            ));
        }

        if self.page_size == 0 {
            return Err(anyhow::anyhow!("数据源 {source} 的分页大小必须大于0"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("数据源 {source} 的请求超时必须大于0"));
        }

        if self.max_pages == 0 {
            return Err(anyhow::anyhow!("数据源 {source} 的最大页数必须大于0"));
        }

        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::with("http://localhost", 0)
    }
}

/// 四个外部数据源的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub tariff_schedule: SourceConfig,
    pub trade_representative: SourceConfig,
    pub customs_rulings: SourceConfig,
    pub federal_register: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            tariff_schedule: SourceConfig::with("https://hts.usitc.gov/reststop", 40),
            trade_representative: SourceConfig::with("https://ustr.gov/api", 30),
            customs_rulings: SourceConfig::with("https://rulings.cbp.gov/api", 20),
            federal_register: SourceConfig::with("https://www.federalregister.gov/api/v1", 10),
        }
    }
}

impl SourcesConfig {
    pub fn get(&self, source: SourceId) -> &SourceConfig {
        match source {
            SourceId::TariffSchedule => &self.tariff_schedule,
            SourceId::TradeRepresentative => &self.trade_representative,
            SourceId::CustomsRulings => &self.customs_rulings,
            SourceId::FederalRegister => &self.federal_register,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = (SourceId, &SourceConfig)> {
        SourceId::ALL
            .into_iter()
            .map(|id| (id, self.get(id)))
            .filter(|(_, cfg)| cfg.enabled)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for id in SourceId::ALL {
            self.get(id).validate(id)?;
        }
        Ok(())
    }
}
