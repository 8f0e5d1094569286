use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::Operator,
    error::ApiResult,
    response::{accepted, success, ApiResponse},
    routes::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub run_id: Uuid,
}

/// 触发一次全量同步，立即返回运行号
pub async fn trigger_sync(
    _operator: Operator,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let run_id = state.orchestrator.trigger_full_sync().await?;
    info!(run_id = %run_id, "运维触发全量同步");
    Ok(accepted(TriggerResponse { run_id }))
}

/// 最近一次运行；尚无运行时 `data` 为空
pub async fn get_latest_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let response = match state.orchestrator.get_latest_status().await? {
        Some(run) => ApiResponse::success(Some(run)),
        None => ApiResponse::success_with_message(None, "尚无同步运行"),
    };
    Ok(response)
}

pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let run = state.orchestrator.get_status(run_id).await?;
    Ok(success(run))
}
