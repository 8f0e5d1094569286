use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};
use tradesync_core::models::{
    CanonicalRecord, ChangeEvent, ChangeKind, EntityType, NewCanonicalRecord, Payload,
};
use tradesync_core::traits::{CanonicalRepository, InsertOutcome};
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, entity_type, natural_key, source_id, source_priority, \
     effective_date, fields, content_hash, supersedes_id, run_id, recorded_at, updated_at";

pub struct SqliteCanonicalRepository {
    pool: SqlitePool,
}

impl SqliteCanonicalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> SyncResult<CanonicalRecord> {
        let entity_type: String = row.try_get("entity_type")?;
        let source_id: String = row.try_get("source_id")?;
        let fields: String = row.try_get("fields")?;
        let run_id: Option<String> = row.try_get("run_id")?;
        let supersedes: i64 = row.try_get("supersedes_id")?;
        Ok(CanonicalRecord {
            id: row.try_get("id")?,
            entity_type: entity_type.parse()?,
            natural_key: row.try_get("natural_key")?,
            source_id: source_id.parse()?,
            source_priority: row.try_get("source_priority")?,
            effective_date: row.try_get("effective_date")?,
            fields: serde_json::from_str::<Payload>(&fields)?,
            content_hash: row.try_get("content_hash")?,
            supersedes: (supersedes != 0).then_some(supersedes),
            run_id: parse_uuid(run_id)?,
            recorded_at: row.try_get("recorded_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> SyncResult<ChangeEvent> {
        let entity_type: String = row.try_get("entity_type")?;
        let kind: String = row.try_get("kind")?;
        let old_value: Option<String> = row.try_get("old_value")?;
        let new_value: Option<String> = row.try_get("new_value")?;
        let run_id: Option<String> = row.try_get("run_id")?;
        Ok(ChangeEvent {
            entity_type: entity_type.parse()?,
            entity_id: row.try_get("entity_id")?,
            kind: ChangeKind::parse(&kind)
                .ok_or_else(|| SyncError::Serialization(format!("未知的变更类型: {kind}")))?,
            field: row.try_get("field")?,
            old_value: old_value.map(|v| serde_json::from_str(&v)).transpose()?,
            new_value: new_value.map(|v| serde_json::from_str(&v)).transpose()?,
            detected_at: row.try_get("detected_at")?,
            run_id: parse_uuid(run_id)?,
        })
    }

    async fn insert_events(
        tx: &mut Transaction<'_, Sqlite>,
        events: &[ChangeEvent],
    ) -> SyncResult<()> {
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO change_events (entity_type, entity_id, kind, field, old_value,
                                           new_value, detected_at, run_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.entity_type.as_str())
            .bind(&event.entity_id)
            .bind(event.kind.as_str())
            .bind(&event.field)
            .bind(event.old_value.as_ref().map(|v| v.to_string()))
            .bind(event.new_value.as_ref().map(|v| v.to_string()))
            .bind(event.detected_at)
            .bind(event.run_id.map(|id| id.to_string()))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn parse_uuid(value: Option<String>) -> SyncResult<Option<Uuid>> {
    value
        .map(|v| {
            Uuid::parse_str(&v).map_err(|e| SyncError::Serialization(format!("无效的UUID {v}: {e}")))
        })
        .transpose()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl CanonicalRepository for SqliteCanonicalRepository {
    #[instrument(skip(self))]
    async fn find_versions(
        &self,
        entity_type: EntityType,
        natural_key: &str,
    ) -> SyncResult<Vec<CanonicalRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM canonical_records \
             WHERE entity_type = ? AND natural_key = ? \
             ORDER BY effective_date, source_priority, id"
        );
        let rows = sqlx::query(&sql)
            .bind(entity_type.as_str())
            .bind(natural_key)
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::Database)?;
        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self, record, events), fields(
        entity_type = %record.entity_type,
        natural_key = %record.natural_key,
        events = events.len(),
    ))]
    async fn insert_version(
        &self,
        record: &NewCanonicalRecord,
        events: &[ChangeEvent],
    ) -> SyncResult<InsertOutcome> {
        let now = Utc::now();
        let fields = serde_json::to_string(&record.fields)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO canonical_records (entity_type, natural_key, source_id, source_priority,
                                           effective_date, fields, content_hash, supersedes_id,
                                           run_id, recorded_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.entity_type.as_str())
        .bind(&record.natural_key)
        .bind(record.source_id.as_str())
        .bind(record.source_priority)
        .bind(record.effective_date)
        .bind(&fields)
        .bind(&record.content_hash)
        .bind(record.supersedes.unwrap_or(0))
        .bind(record.run_id.map(|id| id.to_string()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                debug!("版本已存在，跳过写入");
                return Ok(InsertOutcome::Duplicate);
            }
            Err(e) => return Err(SyncError::Database(e)),
        };

        Self::insert_events(&mut tx, events).await?;
        tx.commit().await?;

        Ok(InsertOutcome::Inserted(record.clone().into_record(id, now)))
    }

    #[instrument(skip(self, record, events), fields(
        natural_key = %record.natural_key,
        events = events.len(),
    ))]
    async fn update_in_place(
        &self,
        id: i64,
        record: &NewCanonicalRecord,
        expected_hash: &str,
        events: &[ChangeEvent],
    ) -> SyncResult<bool> {
        let fields = serde_json::to_string(&record.fields)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE canonical_records
            SET source_id = ?, source_priority = ?, effective_date = ?, fields = ?,
                content_hash = ?, run_id = ?, updated_at = ?
            WHERE id = ? AND content_hash = ?
            "#,
        )
        .bind(record.source_id.as_str())
        .bind(record.source_priority)
        .bind(record.effective_date)
        .bind(&fields)
        .bind(&record.content_hash)
        .bind(record.run_id.map(|id| id.to_string()))
        .bind(Utc::now())
        .bind(id)
        .bind(expected_hash)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("记录已被并发修改，放弃本次更新");
            return Ok(false);
        }

        Self::insert_events(&mut tx, events).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_events(
        &self,
        run_id: Option<Uuid>,
        limit: usize,
    ) -> SyncResult<Vec<ChangeEvent>> {
        let rows = match run_id {
            Some(run_id) => {
                sqlx::query(
                    "SELECT entity_type, entity_id, kind, field, old_value, new_value, detected_at, run_id \
                     FROM change_events WHERE run_id = ? ORDER BY id LIMIT ?",
                )
                .bind(run_id.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT entity_type, entity_id, kind, field, old_value, new_value, detected_at, run_id \
                     FROM change_events ORDER BY id DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn count_records(&self, entity_type: EntityType) -> SyncResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM canonical_records WHERE entity_type = ?")
                .bind(entity_type.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}
