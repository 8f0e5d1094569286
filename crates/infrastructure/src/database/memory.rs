use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tradesync_core::models::{
    version_order, CanonicalRecord, ChangeEvent, EntityType, NewCanonicalRecord, SyncRun,
    SyncRunStatus,
};
use tradesync_core::traits::{CanonicalRepository, InsertOutcome, SyncRunRepository};
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

/// 内存规范库，唯一约束与 SQLite 实现一致
#[derive(Default)]
pub struct InMemoryCanonicalRepository {
    inner: Mutex<CanonicalState>,
}

#[derive(Default)]
struct CanonicalState {
    records: Vec<CanonicalRecord>,
    events: Vec<ChangeEvent>,
    next_id: i64,
}

impl CanonicalState {
    fn conflicts(&self, record: &NewCanonicalRecord) -> bool {
        self.records.iter().any(|existing| {
            existing.entity_type == record.entity_type
                && existing.natural_key == record.natural_key
                && (!record.entity_type.is_append_only()
                    || (existing.effective_date == record.effective_date
                        && existing.content_hash == record.content_hash
                        && existing.supersedes == record.supersedes))
        })
    }
}

impl InMemoryCanonicalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_records(&self) -> Vec<CanonicalRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn all_events(&self) -> Vec<ChangeEvent> {
        self.inner.lock().await.events.clone()
    }
}

#[async_trait]
impl CanonicalRepository for InMemoryCanonicalRepository {
    async fn find_versions(
        &self,
        entity_type: EntityType,
        natural_key: &str,
    ) -> SyncResult<Vec<CanonicalRecord>> {
        let inner = self.inner.lock().await;
        let mut versions: Vec<CanonicalRecord> = inner
            .records
            .iter()
            .filter(|r| r.entity_type == entity_type && r.natural_key == natural_key)
            .cloned()
            .collect();
        versions.sort_by(version_order);
        Ok(versions)
    }

    async fn insert_version(
        &self,
        record: &NewCanonicalRecord,
        events: &[ChangeEvent],
    ) -> SyncResult<InsertOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.conflicts(record) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.next_id += 1;
        let stored = record.clone().into_record(inner.next_id, Utc::now());
        inner.records.push(stored.clone());
        inner.events.extend_from_slice(events);
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn update_in_place(
        &self,
        id: i64,
        record: &NewCanonicalRecord,
        expected_hash: &str,
        events: &[ChangeEvent],
    ) -> SyncResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(existing) = inner
            .records
            .iter_mut()
            .find(|r| r.id == id && r.content_hash == expected_hash)
        else {
            return Ok(false);
        };
        existing.source_id = record.source_id;
        existing.source_priority = record.source_priority;
        existing.effective_date = record.effective_date;
        existing.fields = record.fields.clone();
        existing.content_hash = record.content_hash.clone();
        existing.run_id = record.run_id;
        existing.updated_at = Utc::now();
        inner.events.extend_from_slice(events);
        Ok(true)
    }

    async fn list_events(
        &self,
        run_id: Option<Uuid>,
        limit: usize,
    ) -> SyncResult<Vec<ChangeEvent>> {
        let inner = self.inner.lock().await;
        let events: Vec<ChangeEvent> = match run_id {
            Some(run_id) => inner
                .events
                .iter()
                .filter(|e| e.run_id == Some(run_id))
                .take(limit)
                .cloned()
                .collect(),
            None => inner.events.iter().rev().take(limit).cloned().collect(),
        };
        Ok(events)
    }

    async fn count_records(&self, entity_type: EntityType) -> SyncResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.entity_type == entity_type)
            .count() as u64)
    }
}

/// 内存同步运行仓储
#[derive(Default)]
pub struct InMemorySyncRunRepository {
    runs: Mutex<BTreeMap<Uuid, SyncRun>>,
}

impl InMemorySyncRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncRunRepository for InMemorySyncRunRepository {
    async fn create(&self, run: &SyncRun) -> SyncResult<()> {
        let mut runs = self.runs.lock().await;
        if runs.contains_key(&run.run_id) {
            return Err(SyncError::DatabaseOperation(format!(
                "同步运行已存在: {}",
                run.run_id
            )));
        }
        runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn update(&self, run: &SyncRun) -> SyncResult<()> {
        let mut runs = self.runs.lock().await;
        match runs.get_mut(&run.run_id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => Err(SyncError::RunNotFound { id: run.run_id }),
        }
    }

    async fn get(&self, run_id: Uuid) -> SyncResult<Option<SyncRun>> {
        Ok(self.runs.lock().await.get(&run_id).cloned())
    }

    async fn latest(&self) -> SyncResult<Option<SyncRun>> {
        Ok(self
            .runs
            .lock()
            .await
            .values()
            .max_by_key(|run| run.started_at)
            .cloned())
    }

    async fn list_running(&self) -> SyncResult<Vec<SyncRun>> {
        let mut running: Vec<SyncRun> = self
            .runs
            .lock()
            .await
            .values()
            .filter(|run| run.status == SyncRunStatus::Running)
            .cloned()
            .collect();
        running.sort_by_key(|run| run.started_at);
        Ok(running)
    }
}
