use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use tradesync_core::models::SyncRun;
use tradesync_core::traits::SyncRunRepository;
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

/// 同步运行记录；完整状态以 JSON 保存在 body 列
pub struct SqliteSyncRunRepository {
    pool: SqlitePool,
}

impl SqliteSyncRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> SyncResult<SyncRun> {
        let body: String = row.try_get("body")?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SyncRunRepository for SqliteSyncRunRepository {
    #[instrument(skip(self, run), fields(run_id = %run.run_id))]
    async fn create(&self, run: &SyncRun) -> SyncResult<()> {
        sqlx::query(
            "INSERT INTO sync_runs (run_id, status, started_at, completed_at, body) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run.run_id.to_string())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(serde_json::to_string(run)?)
        .execute(&self.pool)
        .await
        .map_err(SyncError::Database)?;
        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.run_id, status = run.status.as_str()))]
    async fn update(&self, run: &SyncRun) -> SyncResult<()> {
        let result = sqlx::query(
            "UPDATE sync_runs SET status = ?, completed_at = ?, body = ? WHERE run_id = ?",
        )
        .bind(run.status.as_str())
        .bind(run.completed_at)
        .bind(serde_json::to_string(run)?)
        .bind(run.run_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(SyncError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SyncError::RunNotFound { id: run.run_id });
        }
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> SyncResult<Option<SyncRun>> {
        let row = sqlx::query("SELECT body FROM sync_runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(SyncError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn latest(&self) -> SyncResult<Option<SyncRun>> {
        let row = sqlx::query("SELECT body FROM sync_runs ORDER BY started_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(SyncError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_running(&self) -> SyncResult<Vec<SyncRun>> {
        let rows = sqlx::query("SELECT body FROM sync_runs WHERE status = 'running' ORDER BY started_at")
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::Database)?;
        rows.iter().map(Self::row_to_run).collect()
    }
}
