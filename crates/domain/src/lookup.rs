//! 规范库读取路径上的税率查询

use chrono::NaiveDate;
use tradesync_core::models::{select_current, CanonicalRecord, NaturalKey};
use tradesync_core::traits::CanonicalRepository;
use tradesync_core::SyncResult;

/// 查询某商品在某国家于给定日期生效的税率版本
pub async fn current_rate(
    repo: &dyn CanonicalRepository,
    hts_code: &str,
    country_code: &str,
    as_of: NaiveDate,
) -> SyncResult<Option<CanonicalRecord>> {
    let key = NaturalKey::tariff_rate(hts_code, country_code);
    let versions = repo.find_versions(key.entity_type, &key.key).await?;
    Ok(select_current(&versions, as_of).cloned())
}

/// 某商品在某国家的全部税率版本，按版本顺序升序
pub async fn rate_history(
    repo: &dyn CanonicalRepository,
    hts_code: &str,
    country_code: &str,
) -> SyncResult<Vec<CanonicalRecord>> {
    let key = NaturalKey::tariff_rate(hts_code, country_code);
    repo.find_versions(key.entity_type, &key.key).await
}
