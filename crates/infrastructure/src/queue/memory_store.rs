use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tradesync_core::models::{JobCounts, JobStatus, SyncJob};
use tradesync_core::traits::JobStore;
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

/// 内存任务存储，适用于单进程部署和测试
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Jobs>,
}

#[derive(Default)]
struct Jobs {
    jobs: HashMap<Uuid, SyncJob>,
    /// 队列名 → 入队顺序
    order: HashMap<String, Vec<Uuid>>,
}

impl Jobs {
    fn queue_jobs<'a>(&'a self, queue: &str) -> impl Iterator<Item = &'a SyncJob> + 'a {
        self.order
            .get(queue)
            .into_iter()
            .flatten()
            .filter_map(|id| self.jobs.get(id))
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }
}

fn is_claimable(job: &SyncJob, now: DateTime<Utc>) -> bool {
    matches!(job.status, JobStatus::Waiting | JobStatus::Stalled) && job.available_at <= now
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: &SyncJob) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(SyncError::JobQueue(format!("任务已存在: {}", job.id)));
        }
        inner
            .order
            .entry(job.queue_name.clone())
            .or_default()
            .push(job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> SyncResult<Option<SyncJob>> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .queue_jobs(queue)
            .filter(|job| is_claimable(job, now))
            .min_by_key(|job| (job.available_at, job.enqueued_at))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(SyncError::JobNotFound { id })?;
        job.attempt += 1;
        job.status = JobStatus::Active;
        job.started_at = Some(now);
        job.heartbeat_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn update_active(&self, job: &SyncJob, expected_attempt: u32) -> SyncResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&job.id) {
            Some(stored)
                if stored.status == JobStatus::Active && stored.attempt == expected_attempt =>
            {
                *stored = job.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(SyncError::JobNotFound { id: job.id }),
        }
    }

    async fn touch(&self, id: Uuid, attempt: u32, now: DateTime<Utc>) -> SyncResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Active && job.attempt == attempt => {
                job.heartbeat_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: Uuid) -> SyncResult<Option<SyncJob>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn list(&self, queue: &str, status: JobStatus, limit: usize) -> SyncResult<Vec<SyncJob>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<SyncJob> = inner
            .queue_jobs(queue)
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.finished_at.unwrap_or(job.enqueued_at)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_stale_active(
        &self,
        queue: &str,
        older_than: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .queue_jobs(queue)
            .filter(|job| {
                job.status == JobStatus::Active
                    && job.heartbeat_at.or(job.started_at).is_some_and(|hb| hb < older_than)
            })
            .cloned()
            .collect())
    }

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> SyncResult<JobCounts> {
        let inner = self.inner.lock().await;
        let mut counts = JobCounts::default();
        for job in inner.queue_jobs(queue) {
            match job.status {
                JobStatus::Waiting if job.available_at > now => counts.delayed += 1,
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Stalled => counts.stalled += 1,
            }
        }
        Ok(counts)
    }

    async fn prune(
        &self,
        queue: &str,
        keep_completed: usize,
        keep_failed: usize,
    ) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut doomed = Vec::new();
        for (status, keep) in [
            (JobStatus::Completed, keep_completed),
            (JobStatus::Failed, keep_failed),
        ] {
            let mut finished: Vec<(DateTime<Utc>, Uuid)> = inner
                .queue_jobs(queue)
                .filter(|job| job.status == status)
                .map(|job| (job.finished_at.unwrap_or(job.enqueued_at), job.id))
                .collect();
            finished.sort_by(|a, b| b.cmp(a));
            doomed.extend(finished.into_iter().skip(keep).map(|(_, id)| id));
        }

        for id in &doomed {
            inner.jobs.remove(id);
        }
        if let Some(order) = inner.order.get_mut(queue) {
            order.retain(|id| !doomed.contains(id));
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tradesync_core::models::JobPayload;

    fn job(queue: &str, now: DateTime<Utc>) -> SyncJob {
        SyncJob::new(queue, JobPayload::Cleanup, None, 3, now)
    }

    #[tokio::test]
    async fn test_claim_respects_fifo_and_availability() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let first = job("cleanup", now);
        let mut delayed = job("cleanup", now);
        delayed.available_at = now + Duration::seconds(30);
        store.enqueue(&delayed).await.unwrap();
        store.enqueue(&first).await.unwrap();

        let claimed = store.claim_next("cleanup", now).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.attempt, 1);
        assert_eq!(claimed.status, JobStatus::Active);

        assert!(store.claim_next("cleanup", now).await.unwrap().is_none());
        let later = store
            .claim_next("cleanup", now + Duration::seconds(31))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(later.id, delayed.id);
    }

    #[tokio::test]
    async fn test_update_active_rejects_stale_attempt() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        store.enqueue(&job("products", now)).await.unwrap();
        let mut claimed = store.claim_next("products", now).await.unwrap().unwrap();

        claimed.status = JobStatus::Completed;
        assert!(!store.update_active(&claimed, 2).await.unwrap());
        assert!(store.update_active(&claimed, 1).await.unwrap());
        // 已经不是 active，重复写入被拒绝
        assert!(!store.update_active(&claimed, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_keeps_most_recent() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store.enqueue(&job("cleanup", now)).await.unwrap();
            let mut claimed = store.claim_next("cleanup", now).await.unwrap().unwrap();
            claimed.status = JobStatus::Completed;
            claimed.finished_at = Some(now + Duration::seconds(i));
            store.update_active(&claimed, 1).await.unwrap();
        }

        assert_eq!(store.prune("cleanup", 2, 10).await.unwrap(), 3);
        let kept = store.list("cleanup", JobStatus::Completed, 10).await.unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].finished_at, Some(now + Duration::seconds(4)));
    }
}
