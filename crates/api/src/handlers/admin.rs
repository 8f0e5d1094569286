use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tradesync_core::models::{JobPayload, SyncJob};
use uuid::Uuid;

use crate::{auth::Operator, error::ApiResult, response::success, routes::AppState};

const DEFAULT_FAILED_LIMIT: usize = 20;
const MAX_FAILED_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct FailedJobsQuery {
    pub limit: Option<usize>,
}

/// 死信任务的只读视图
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJobView {
    pub id: Uuid,
    pub run_id: Option<Uuid>,
    pub payload: JobPayload,
    pub attempt: u32,
    pub max_attempts: u32,
    pub stalled_count: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<SyncJob> for FailedJobView {
    fn from(job: SyncJob) -> Self {
        Self {
            id: job.id,
            run_id: job.run_id,
            payload: job.payload,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            stalled_count: job.stalled_count,
            last_error: job.last_error,
            enqueued_at: job.enqueued_at,
            finished_at: job.finished_at,
        }
    }
}

/// 各队列按状态的任务计数
pub async fn list_queues(
    _operator: Operator,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state.queues.snapshot(Utc::now()).await?;
    Ok(success(snapshot))
}

pub async fn failed_jobs(
    _operator: Operator,
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FailedJobsQuery>,
) -> ApiResult<impl IntoResponse> {
    let queue = state.queues.get(&name)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_LIMIT)
        .clamp(1, MAX_FAILED_LIMIT);
    let jobs: Vec<FailedJobView> = queue
        .failed_jobs(limit)
        .await?
        .into_iter()
        .map(FailedJobView::from)
        .collect();
    Ok(success(jobs))
}
