use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use tradesync_core::models::{Domain, JobCounts, JobEvent, SyncJob, ALL_QUEUES, CLEANUP_QUEUE};
use tradesync_core::traits::JobStore;
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

use super::job_queue::{JobQueue, QueueSettings};

/// 单个队列的只读状态快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub name: String,
    pub counts: JobCounts,
    pub closed: bool,
}

/// 进程启动时构建一次的队列注册表，显式传给编排器与工作者
pub struct QueueRegistry {
    queues: BTreeMap<String, Arc<JobQueue>>,
}

impl QueueRegistry {
    /// 为全部标准队列创建实例，共享同一个存储后端
    pub fn new(
        store: Arc<dyn JobStore>,
        settings: QueueSettings,
        events: Option<mpsc::UnboundedSender<JobEvent>>,
    ) -> Self {
        let queues = ALL_QUEUES
            .iter()
            .map(|name| {
                let queue = JobQueue::new(*name, store.clone(), settings.clone(), events.clone());
                (name.to_string(), Arc::new(queue))
            })
            .collect();
        Self { queues }
    }

    pub fn get(&self, name: &str) -> SyncResult<Arc<JobQueue>> {
        self.queues
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::QueueNotFound(name.to_string()))
    }

    pub fn for_domain(&self, domain: Domain) -> SyncResult<Arc<JobQueue>> {
        self.get(domain.queue_name())
    }

    pub fn cleanup(&self) -> SyncResult<Arc<JobQueue>> {
        self.get(CLEANUP_QUEUE)
    }

    pub fn queues(&self) -> impl Iterator<Item = &Arc<JobQueue>> {
        self.queues.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    /// 所有队列的计数快照
    pub async fn snapshot(&self, now: DateTime<Utc>) -> SyncResult<Vec<QueueSnapshot>> {
        let mut snapshots = Vec::with_capacity(self.queues.len());
        for queue in self.queues.values() {
            snapshots.push(QueueSnapshot {
                name: queue.name().to_string(),
                counts: queue.counts(now).await?,
                closed: queue.is_closed(),
            });
        }
        Ok(snapshots)
    }

    /// 在任意队列中查找任务
    pub async fn find_job(&self, id: Uuid) -> SyncResult<Option<SyncJob>> {
        for queue in self.queues.values() {
            if let Some(job) = queue.get_job(id).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    pub fn close_all(&self) {
        for queue in self.queues.values() {
            queue.close();
        }
        info!("所有队列已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryJobStore;
    use tradesync_core::models::JobPayload;

    fn registry() -> QueueRegistry {
        QueueRegistry::new(
            Arc::new(InMemoryJobStore::new()),
            QueueSettings::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_registry_exposes_standard_queues() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            vec!["cleanup", "products", "tariff-rates", "trade-updates"]
        );
        assert_eq!(
            registry.for_domain(Domain::TradeUpdate).unwrap().name(),
            "trade-updates"
        );
        assert!(matches!(
            registry.get("bogus"),
            Err(SyncError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_and_find_job() {
        let registry = registry();
        let now = Utc::now();
        let job = registry
            .cleanup()
            .unwrap()
            .add(JobPayload::Cleanup, None, now)
            .await
            .unwrap();

        let snapshot = registry.snapshot(now).await.unwrap();
        let cleanup = snapshot.iter().find(|s| s.name == "cleanup").unwrap();
        assert_eq!(cleanup.counts.waiting, 1);

        assert_eq!(registry.find_job(job.id).await.unwrap().unwrap().id, job.id);
        assert!(registry.find_job(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = registry();
        registry.close_all();
        assert!(registry.queues().all(|q| q.is_closed()));
        let snapshot = registry.snapshot(Utc::now()).await.unwrap();
        assert!(snapshot.iter().all(|s| s.closed));
    }
}
