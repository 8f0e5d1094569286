use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{JobCounts, JobStatus, SyncJob};
use crate::SyncResult;

/// 任务队列的持久化后端
///
/// 所有实现都必须保证 `claim_next` 与 `update_active` 的原子性：同一个任务只能
/// 被一个工作者领取，过期的尝试无法覆盖新的状态。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 新任务入队
    async fn enqueue(&self, job: &SyncJob) -> SyncResult<()>;

    /// 领取队列中最早可执行的任务（`available_at <= now`），
    /// 将其置为 `active`、尝试次数加一并写入开始与心跳时间
    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> SyncResult<Option<SyncJob>>;

    /// 仅当存储中的任务仍是同一次 `active` 尝试时，用 `job` 覆盖它。
    /// 返回是否写入成功
    async fn update_active(&self, job: &SyncJob, expected_attempt: u32) -> SyncResult<bool>;

    /// 刷新活跃任务的心跳
    async fn touch(&self, id: Uuid, attempt: u32, now: DateTime<Utc>) -> SyncResult<bool>;

    async fn get(&self, id: Uuid) -> SyncResult<Option<SyncJob>>;

    /// 按状态列出任务，最近的在前
    async fn list(&self, queue: &str, status: JobStatus, limit: usize) -> SyncResult<Vec<SyncJob>>;

    /// 心跳早于 `older_than` 的活跃任务
    async fn list_stale_active(
        &self,
        queue: &str,
        older_than: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncJob>>;

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> SyncResult<JobCounts>;

    /// 只保留最近的若干已完成/已失败任务，返回删除数量
    async fn prune(&self, queue: &str, keep_completed: usize, keep_failed: usize)
        -> SyncResult<u64>;
}
