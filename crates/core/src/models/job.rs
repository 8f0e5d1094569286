use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{Domain, SourceId};
use super::run::SyncCounts;

pub const PRODUCTS_QUEUE: &str = "products";
pub const TARIFF_RATES_QUEUE: &str = "tariff-rates";
pub const TRADE_UPDATES_QUEUE: &str = "trade-updates";
pub const CLEANUP_QUEUE: &str = "cleanup";

pub const ALL_QUEUES: [&str; 4] = [
    PRODUCTS_QUEUE,
    TARIFF_RATES_QUEUE,
    TRADE_UPDATES_QUEUE,
    CLEANUP_QUEUE,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Stalled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stalled => "stalled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// 任务负载
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Sync { source: SourceId, domain: Domain },
    Cleanup,
}

/// 队列中的一个工作单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub id: Uuid,
    pub queue_name: String,
    pub payload: JobPayload,
    pub run_id: Option<Uuid>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    /// 退避结束前不会被领取
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stalled_count: u32,
    pub last_error: Option<String>,
    /// 断点续传游标，由适配器给出
    pub cursor: Option<String>,
    /// 跨重试累计的计数
    pub progress: SyncCounts,
}

impl SyncJob {
    pub fn new(
        queue_name: impl Into<String>,
        payload: JobPayload,
        run_id: Option<Uuid>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            payload,
            run_id,
            attempt: 0,
            max_attempts,
            status: JobStatus::Waiting,
            enqueued_at: now,
            available_at: now,
            started_at: None,
            heartbeat_at: None,
            finished_at: None,
            stalled_count: 0,
            last_error: None,
            cursor: None,
            progress: SyncCounts::default(),
        }
    }

    pub fn source(&self) -> Option<SourceId> {
        match self.payload {
            JobPayload::Sync { source, .. } => Some(source),
            JobPayload::Cleanup => None,
        }
    }

    pub fn domain(&self) -> Option<Domain> {
        match self.payload {
            JobPayload::Sync { domain, .. } => Some(domain),
            JobPayload::Cleanup => None,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn describe(&self) -> String {
        match &self.payload {
            JobPayload::Sync { source, domain } => {
                format!("{}[{}:{}#{}]", self.queue_name, source, domain, self.id)
            }
            JobPayload::Cleanup => format!("{}[cleanup#{}]", self.queue_name, self.id),
        }
    }
}

/// 单个队列的任务计数，供监控界面读取
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: u64,
    /// 处于退避中的等待任务
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub stalled: u64,
}

/// 队列向编排器报告的状态变化
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Completed {
        job: SyncJob,
        counts: SyncCounts,
    },
    RetryScheduled {
        job: SyncJob,
        error: String,
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        job: SyncJob,
        error: String,
    },
    Stalled {
        job: SyncJob,
        requeued: bool,
    },
}

impl JobEvent {
    pub fn job(&self) -> &SyncJob {
        match self {
            JobEvent::Completed { job, .. }
            | JobEvent::RetryScheduled { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Stalled { job, .. } => job,
        }
    }

    /// 任务是否到达终态
    pub fn is_terminal(&self) -> bool {
        self.job().status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_defaults() {
        let now = Utc::now();
        let job = SyncJob::new(
            TARIFF_RATES_QUEUE,
            JobPayload::Sync {
                source: SourceId::TariffSchedule,
                domain: Domain::TariffRate,
            },
            None,
            3,
            now,
        );
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.available_at, now);
        assert_eq!(job.source(), Some(SourceId::TariffSchedule));
        assert_eq!(job.domain(), Some(Domain::TariffRate));
        assert!(!job.attempts_exhausted());
    }

    #[test]
    fn test_payload_serialization_is_tagged() {
        let payload = JobPayload::Sync {
            source: SourceId::FederalRegister,
            domain: Domain::TradeUpdate,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "sync");
        assert_eq!(value["source"], "federal_register");

        let cleanup = serde_json::to_value(JobPayload::Cleanup).unwrap();
        assert_eq!(cleanup["kind"], "cleanup");
    }
}
