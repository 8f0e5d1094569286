use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{Domain, SourceId};

/// 单个任务或数据源的计数
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub fetched: u64,
    pub upserted: u64,
    pub changed: u64,
    pub failed: u64,
}

impl SyncCounts {
    pub fn merge(&mut self, other: &SyncCounts) {
        self.fetched += other.fetched;
        self.upserted += other.upserted;
        self.changed += other.changed;
        self.failed += other.failed;
    }

    /// 每条抓取到的记录都失败才算整体失败
    pub fn is_total_failure(&self) -> bool {
        self.fetched > 0 && self.failed >= self.fetched
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Completed,
    PartiallyFailed,
    Failed,
    TimedOut,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::PartiallyFailed => "partially_failed",
            SyncRunStatus::Failed => "failed",
            SyncRunStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, SyncRunStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub job_id: Uuid,
    pub source: Option<SourceId>,
    pub domain: Option<Domain>,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// 每个数据源在一次运行中的统计
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounts {
    #[serde(flatten)]
    pub counts: SyncCounts,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// 一次编排运行的状态记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: DateTime<Utc>,
    pub status: SyncRunStatus,
    pub per_source_counts: BTreeMap<SourceId, SourceCounts>,
    pub failures: Vec<RunFailure>,
    pub job_ids: Vec<Uuid>,
    pub resolved_job_ids: BTreeSet<Uuid>,
}

impl SyncRun {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, timeout: Duration) -> Self {
        Self {
            run_id,
            started_at,
            completed_at: None,
            deadline: started_at + timeout,
            status: SyncRunStatus::Running,
            per_source_counts: BTreeMap::new(),
            failures: Vec::new(),
            job_ids: Vec::new(),
            resolved_job_ids: BTreeSet::new(),
        }
    }

    pub fn is_tracking(&self, job_id: &Uuid) -> bool {
        self.job_ids.contains(job_id)
    }

    pub fn unresolved_jobs(&self) -> Vec<Uuid> {
        self.job_ids
            .iter()
            .filter(|id| !self.resolved_job_ids.contains(id))
            .copied()
            .collect()
    }

    /// 记录任务完成；重复投递返回 false
    pub fn record_completion(
        &mut self,
        job_id: Uuid,
        source: Option<SourceId>,
        counts: &SyncCounts,
    ) -> bool {
        if !self.resolve(job_id) {
            return false;
        }
        if let Some(source) = source {
            let entry = self.per_source_counts.entry(source).or_default();
            entry.counts.merge(counts);
            entry.jobs_completed += 1;
        }
        true
    }

    /// 记录任务失败；重复投递返回 false
    pub fn record_failure(
        &mut self,
        job_id: Uuid,
        source: Option<SourceId>,
        domain: Option<Domain>,
        partial: &SyncCounts,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.resolve(job_id) {
            return false;
        }
        if let Some(source) = source {
            let entry = self.per_source_counts.entry(source).or_default();
            entry.counts.merge(partial);
            entry.jobs_failed += 1;
        }
        self.failures.push(RunFailure {
            job_id,
            source,
            domain,
            error: error.into(),
            at,
        });
        true
    }

    fn resolve(&mut self, job_id: Uuid) -> bool {
        if self.status.is_final() || !self.is_tracking(&job_id) {
            return false;
        }
        self.resolved_job_ids.insert(job_id)
    }

    pub fn all_jobs_resolved(&self) -> bool {
        self.job_ids
            .iter()
            .all(|id| self.resolved_job_ids.contains(id))
    }

    /// 全部任务到达终态时结束运行，返回是否发生了状态变化
    pub fn try_finalize(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_final() || !self.all_jobs_resolved() {
            return false;
        }
        let failed_jobs = self.failures.len();
        self.status = if failed_jobs == 0 {
            SyncRunStatus::Completed
        } else if failed_jobs >= self.job_ids.len() {
            SyncRunStatus::Failed
        } else {
            SyncRunStatus::PartiallyFailed
        };
        self.completed_at = Some(now);
        true
    }

    /// 超过全局超时仍未结束的运行标记为 timed_out，保留部分计数
    pub fn try_time_out(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_final() || now < self.deadline {
            return false;
        }
        self.status = SyncRunStatus::TimedOut;
        self.completed_at = Some(now);
        true
    }

    pub fn totals(&self) -> SyncCounts {
        let mut totals = SyncCounts::default();
        for counts in self.per_source_counts.values() {
            totals.merge(&counts.counts);
        }
        totals
    }
}
