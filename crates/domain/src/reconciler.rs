use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use tradesync_core::models::{
    select_current, ChangeEvent, NaturalKey, NewCanonicalRecord, SourceId, SourceRecord,
    SyncCounts, EFFECTIVE_DATE_FIELD,
};
use tradesync_core::traits::{CanonicalRepository, InsertOutcome, ItemFailure};
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

use crate::diff::{diff_fields, FieldChange};

/// 原地更新实体在并发冲突时的最大尝试次数
const IN_PLACE_ATTEMPTS: usize = 2;

/// 一个批次的对账结果
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub received: u64,
    /// 批次内摘要重复而跳过的记录
    pub deduplicated: u64,
    /// 写入的规范行（新建、新版本、历史版本、原地更新）
    pub upserted: u64,
    /// 当前状态发生变化的实体数
    pub changed: u64,
    pub unchanged: u64,
    /// 同批次中被同键记录取代的原地更新实体
    pub superseded: u64,
    pub events: u64,
    pub failures: Vec<ItemFailure>,
}

impl ReconcileReport {
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// 转换为任务计数；`fetched` 由调用方填写
    pub fn counts(&self) -> SyncCounts {
        SyncCounts {
            fetched: 0,
            upserted: self.upserted,
            changed: self.changed,
            failed: self.failed(),
        }
    }

    fn fail(&mut self, external_id: String, error: SyncError) {
        self.failures.push(ItemFailure { external_id, error });
    }

    fn apply(&mut self, applied: Applied, source: SourceId) {
        match applied {
            Applied::Created => {
                self.upserted += 1;
                self.changed += 1;
                self.events += 1;
            }
            Applied::Updated(events) => {
                self.upserted += 1;
                self.changed += 1;
                self.events += events as u64;
            }
            Applied::History => self.upserted += 1,
            Applied::Unchanged => self.unchanged += 1,
        }
        if matches!(applied, Applied::Created | Applied::Updated(_)) {
            metrics::counter!("tradesync_records_changed_total", "source" => source.as_str())
                .increment(1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated(usize),
    /// 只作为历史保存，不产生事件
    History,
    Unchanged,
}

struct Candidate {
    external_id: String,
    source_id: SourceId,
    record: NewCanonicalRecord,
}

impl Candidate {
    fn rank(&self) -> (Option<NaiveDate>, i32) {
        (self.record.effective_date, self.record.source_priority)
    }
}

/// 对账引擎：把规范化记录合并进规范库，并为实质性变化生成变更事件
///
/// 同一自然键的并发写入依靠仓储的唯一约束串行化。
pub struct Reconciler {
    repo: Arc<dyn CanonicalRepository>,
    priorities: BTreeMap<SourceId, i32>,
}

impl Reconciler {
    pub fn new(repo: Arc<dyn CanonicalRepository>, priorities: BTreeMap<SourceId, i32>) -> Self {
        Self { repo, priorities }
    }

    pub fn priority(&self, source: SourceId) -> i32 {
        self.priorities.get(&source).copied().unwrap_or(0)
    }

    /// 对账一个批次。单条记录的错误只计入失败，不会中断整个批次。
    #[instrument(skip_all, fields(records = records.len(), run_id = ?run_id))]
    pub async fn reconcile(
        &self,
        records: Vec<SourceRecord>,
        run_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            received: records.len() as u64,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut groups: BTreeMap<NaturalKey, Vec<Candidate>> = BTreeMap::new();
        for record in records {
            if !seen.insert((record.domain, record.content_hash.clone())) {
                report.deduplicated += 1;
                continue;
            }
            match self.candidate(record, run_id) {
                Ok((key, candidate)) => groups.entry(key).or_default().push(candidate),
                Err(failure) => {
                    warn!(external_id = %failure.external_id, error = %failure.error, "记录无法对账");
                    report.failures.push(failure);
                }
            }
        }

        for (key, group) in groups {
            self.reconcile_group(&key, group, now, &mut report).await;
        }

        info!(
            received = report.received,
            deduplicated = report.deduplicated,
            upserted = report.upserted,
            changed = report.changed,
            failed = report.failed(),
            "批次对账完成"
        );
        report
    }

    fn candidate(
        &self,
        record: SourceRecord,
        run_id: Option<Uuid>,
    ) -> Result<(NaturalKey, Candidate), ItemFailure> {
        let failure = |error: SyncError| ItemFailure {
            external_id: record.external_id.clone(),
            error,
        };

        let key = NaturalKey::for_record(&record).map_err(failure)?;
        let effective_date = effective_date(&record).map_err(failure)?;
        if key.entity_type.is_append_only() && effective_date.is_none() {
            return Err(failure(SyncError::Normalization {
                external_id: record.external_id.clone(),
                message: format!("缺少字段 {EFFECTIVE_DATE_FIELD}"),
            }));
        }

        let candidate = Candidate {
            external_id: record.external_id,
            source_id: record.source_id,
            record: NewCanonicalRecord {
                entity_type: key.entity_type,
                natural_key: key.key.clone(),
                source_id: record.source_id,
                source_priority: self.priority(record.source_id),
                effective_date,
                fields: record.payload,
                content_hash: record.content_hash,
                supersedes: None,
                run_id,
            },
        };
        Ok((key, candidate))
    }

    async fn reconcile_group(
        &self,
        key: &NaturalKey,
        mut group: Vec<Candidate>,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) {
        // 生效日期最晚者胜出，其次优先级最高，再次批次中靠后者
        let Some(winner_index) = group
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.rank().cmp(&b.rank()).then(ia.cmp(ib)))
            .map(|(i, _)| i)
        else {
            return;
        };
        let winner = group.remove(winner_index);
        let append_only = key.entity_type.is_append_only();

        let result = if append_only {
            self.reconcile_version(key, &winner, now).await
        } else {
            self.reconcile_in_place(key, &winner, now).await
        };
        match result {
            Ok(applied) => {
                debug!(key = %key, ?applied, "记录已对账");
                report.apply(applied, winner.source_id);
            }
            Err(e) => {
                warn!(key = %key, external_id = %winner.external_id, error = %e, "记录对账失败");
                report.fail(winner.external_id, e);
            }
        }

        for loser in group {
            if !append_only {
                debug!(key = %key, external_id = %loser.external_id, "同批次记录被取代");
                report.superseded += 1;
                continue;
            }
            match self.repo.insert_version(&loser.record, &[]).await {
                Ok(InsertOutcome::Inserted(_)) => report.apply(Applied::History, loser.source_id),
                Ok(InsertOutcome::Duplicate) => report.apply(Applied::Unchanged, loser.source_id),
                Err(e) => {
                    warn!(key = %key, external_id = %loser.external_id, error = %e, "历史版本写入失败");
                    report.fail(loser.external_id, e);
                }
            }
        }
    }

    /// 只追加实体：与传入生效日期当时的版本比较，有变化时写入新版本。
    ///
    /// 新版本记录它所比较的基线，因此回退到旧值也会写入新行；
    /// 并发写入同一基线上的同一内容时只有一个成功。
    async fn reconcile_version(
        &self,
        key: &NaturalKey,
        candidate: &Candidate,
        now: DateTime<Utc>,
    ) -> SyncResult<Applied> {
        let effective_date = candidate.record.effective_date.ok_or_else(|| {
            SyncError::Reconciliation(format!("{key} 缺少生效日期"))
        })?;
        let versions = self
            .repo
            .find_versions(key.entity_type, &key.key)
            .await?;

        if versions.is_empty() {
            let record = &candidate.record;
            let created = self.created_event(key, record, now)?;
            return Ok(match self.repo.insert_version(record, &[created]).await? {
                InsertOutcome::Inserted(_) => Applied::Created,
                InsertOutcome::Duplicate => Applied::Unchanged,
            });
        }

        let Some(baseline) = select_current(&versions, effective_date) else {
            // 早于所有已知版本的回填只作为历史保存
            return self.insert_history(&candidate.record).await;
        };

        let changes = diff_fields(
            &baseline.fields,
            &candidate.record.fields,
            &[EFFECTIVE_DATE_FIELD],
        );
        if changes.is_empty() {
            return Ok(Applied::Unchanged);
        }

        let record = NewCanonicalRecord {
            supersedes: Some(baseline.id),
            ..candidate.record.clone()
        };
        let outranked = baseline.effective_date == Some(effective_date)
            && baseline.source_priority > record.source_priority;
        if outranked {
            return self.insert_history(&record).await;
        }

        let events = updated_events(key, &record, &changes, now);
        Ok(match self.repo.insert_version(&record, &events).await? {
            InsertOutcome::Inserted(_) => Applied::Updated(events.len()),
            InsertOutcome::Duplicate => Applied::Unchanged,
        })
    }

    async fn insert_history(&self, record: &NewCanonicalRecord) -> SyncResult<Applied> {
        Ok(match self.repo.insert_version(record, &[]).await? {
            InsertOutcome::Inserted(_) => Applied::History,
            InsertOutcome::Duplicate => Applied::Unchanged,
        })
    }

    /// 原地更新实体：新建或按旧摘要条件更新，冲突时重试一次
    async fn reconcile_in_place(
        &self,
        key: &NaturalKey,
        candidate: &Candidate,
        now: DateTime<Utc>,
    ) -> SyncResult<Applied> {
        let record = &candidate.record;

        for attempt in 1..=IN_PLACE_ATTEMPTS {
            let versions = self
                .repo
                .find_versions(key.entity_type, &key.key)
                .await?;

            match versions.last() {
                None => {
                    let created = self.created_event(key, record, now)?;
                    match self.repo.insert_version(record, &[created]).await? {
                        InsertOutcome::Inserted(_) => return Ok(Applied::Created),
                        InsertOutcome::Duplicate => {
                            debug!(key = %key, attempt, "新建时发生唯一约束冲突，改走更新路径");
                        }
                    }
                }
                Some(current) => {
                    let changes = diff_fields(&current.fields, &record.fields, &[]);
                    if changes.is_empty() {
                        return Ok(Applied::Unchanged);
                    }
                    let events = updated_events(key, record, &changes, now);
                    if self
                        .repo
                        .update_in_place(current.id, record, &current.content_hash, &events)
                        .await?
                    {
                        return Ok(Applied::Updated(events.len()));
                    }
                    debug!(key = %key, attempt, "记录已被并发修改");
                }
            }
        }

        Err(SyncError::Reconciliation(format!(
            "{key} 并发写入冲突，重试后仍未成功"
        )))
    }

    fn created_event(
        &self,
        key: &NaturalKey,
        record: &NewCanonicalRecord,
        now: DateTime<Utc>,
    ) -> SyncResult<ChangeEvent> {
        Ok(ChangeEvent::created(
            key.entity_type,
            key.key.clone(),
            serde_json::to_value(&record.fields)?,
            now,
            record.run_id,
        ))
    }
}

fn updated_events(
    key: &NaturalKey,
    record: &NewCanonicalRecord,
    changes: &[FieldChange],
    now: DateTime<Utc>,
) -> Vec<ChangeEvent> {
    changes
        .iter()
        .map(|change| {
            ChangeEvent::updated(
                key.entity_type,
                key.key.clone(),
                change.field.clone(),
                change.old_value.clone(),
                change.new_value.clone(),
                now,
                record.run_id,
            )
        })
        .collect()
}

/// 解析负载中的生效日期；接受 `YYYY-MM-DD` 或以其开头的时间戳
fn effective_date(record: &SourceRecord) -> SyncResult<Option<NaiveDate>> {
    let Some(value) = record.payload.get(EFFECTIVE_DATE_FIELD) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let text = value.as_str().unwrap_or_default();
    let date_part = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| SyncError::Normalization {
            external_id: record.external_id.clone(),
            message: format!("无效的生效日期: {value}"),
        })
}
