use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, instrument};
use tradesync_core::models::{JobCounts, JobStatus, SyncJob};
use tradesync_core::traits::JobStore;
use tradesync_core::{SyncError, SyncResult};
use uuid::Uuid;

/// 原子地领取最早可执行的任务：移出等待集合、写回 active 状态并移入活跃集合。
///
/// 任务键由 `ARGV[2]` 前缀与任务ID拼出；任务 JSON 已不存在的悬空ID直接丢弃。
const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
redis.call('SREM', KEYS[3], id)
local job_key = ARGV[2] .. id
local current = redis.call('GET', job_key)
if not current then
    return false
end
local job = cjson.decode(current)
job['attempt'] = tonumber(job['attempt']) + 1
job['status'] = 'active'
job['startedAt'] = ARGV[3]
job['heartbeatAt'] = ARGV[3]
local updated = cjson.encode(job)
redis.call('SET', job_key, updated)
redis.call('ZADD', KEYS[2], ARGV[1], id)
return updated
"#;

/// 仅当存储的任务仍是同一次 active 尝试时写入，并按新状态移动集合
const UPDATE_ACTIVE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
local job = cjson.decode(current)
if job['status'] ~= 'active' or tonumber(job['attempt']) ~= tonumber(ARGV[2]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3])
local status = ARGV[4]
if status == 'active' then
    return 1
end
redis.call('ZREM', KEYS[3], ARGV[1])
if status == 'waiting' then
    redis.call('ZADD', KEYS[2], ARGV[5], ARGV[1])
elseif status == 'stalled' then
    redis.call('ZADD', KEYS[2], ARGV[5], ARGV[1])
    redis.call('SADD', KEYS[6], ARGV[1])
elseif status == 'completed' then
    redis.call('ZADD', KEYS[4], ARGV[5], ARGV[1])
elseif status == 'failed' then
    redis.call('ZADD', KEYS[5], ARGV[5], ARGV[1])
end
return 1
"#;

/// 心跳记录在活跃集合的分数中
const TOUCH_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
local job = cjson.decode(current)
if job['status'] ~= 'active' or tonumber(job['attempt']) ~= tonumber(ARGV[2]) then
    return 0
end
redis.call('ZADD', KEYS[2], 'XX', ARGV[3], ARGV[1])
return 1
"#;

/// 基于 Redis 的持久化任务存储，可被多个进程共享
///
/// 键布局（`{prefix}` 为配置的键前缀）：
/// - `{prefix}:job:{id}` - 任务 JSON
/// - `{prefix}:queue:{name}:waiting` - 有序集合，分数为可领取时间
/// - `{prefix}:queue:{name}:active` - 有序集合，分数为最近心跳
/// - `{prefix}:queue:{name}:completed` / `failed` - 有序集合，分数为结束时间
/// - `{prefix}:queue:{name}:stalled` - 停滞后重新排队、尚未被领取的任务
pub struct RedisJobStore {
    conn: ConnectionManager,
    prefix: String,
    claim_script: Script,
    update_script: Script,
    touch_script: Script,
}

struct QueueKeys {
    waiting: String,
    active: String,
    completed: String,
    failed: String,
    stalled: String,
}

fn redis_error(e: redis::RedisError) -> SyncError {
    SyncError::JobQueue(format!("Redis命令失败: {e}"))
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            claim_script: Script::new(CLAIM_SCRIPT),
            update_script: Script::new(UPDATE_ACTIVE_SCRIPT),
            touch_script: Script::new(TOUCH_SCRIPT),
        }
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    fn queue_keys(&self, queue: &str) -> QueueKeys {
        let base = format!("{}:queue:{queue}", self.prefix);
        QueueKeys {
            waiting: format!("{base}:waiting"),
            active: format!("{base}:active"),
            completed: format!("{base}:completed"),
            failed: format!("{base}:failed"),
            stalled: format!("{base}:stalled"),
        }
    }

    async fn load_many(&self, ids: Vec<String>) -> SyncResult<Vec<SyncJob>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .map(|id| self.job_key(id))
            .collect();
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(SyncError::from))
            .collect()
    }

    async fn zcount(&self, key: &str, min: &str, max: &str) -> SyncResult<u64> {
        let mut conn = self.conn.clone();
        redis::cmd("ZCOUNT")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)
    }
}

fn score(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl JobStore for RedisJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, queue = %job.queue_name))]
    async fn enqueue(&self, job: &SyncJob) -> SyncResult<()> {
        let keys = self.queue_keys(&job.queue_name);
        let json = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.job_key(job.id))
            .arg(json)
            .arg("NX")
            .ignore()
            .cmd("ZADD")
            .arg(&keys.waiting)
            .arg(score(job.available_at))
            .arg(job.id.to_string())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(redis_error)?;
        debug!("任务已写入Redis");
        Ok(())
    }

    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> SyncResult<Option<SyncJob>> {
        let keys = self.queue_keys(queue);
        let mut conn = self.conn.clone();
        let claimed: Option<String> = self
            .claim_script
            .key(&keys.waiting)
            .key(&keys.active)
            .key(&keys.stalled)
            .arg(score(now))
            .arg(format!("{}:job:", self.prefix))
            .arg(now.to_rfc3339_opts(SecondsFormat::Millis, true))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;

        let Some(json) = claimed else {
            return Ok(None);
        };
        let job: SyncJob = serde_json::from_str(&json)?;
        debug!(job_id = %job.id, attempt = job.attempt, "任务已领取");
        Ok(Some(job))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = job.status.as_str()))]
    async fn update_active(&self, job: &SyncJob, expected_attempt: u32) -> SyncResult<bool> {
        let keys = self.queue_keys(&job.queue_name);
        let json = serde_json::to_string(job)?;
        let at = match job.status {
            JobStatus::Waiting | JobStatus::Stalled => job.available_at,
            JobStatus::Completed | JobStatus::Failed => job.finished_at.unwrap_or_else(Utc::now),
            JobStatus::Active => job.heartbeat_at.unwrap_or_else(Utc::now),
        };
        let mut conn = self.conn.clone();
        let result: i64 = self
            .update_script
            .key(self.job_key(job.id))
            .key(&keys.waiting)
            .key(&keys.active)
            .key(&keys.completed)
            .key(&keys.failed)
            .key(&keys.stalled)
            .arg(job.id.to_string())
            .arg(expected_attempt)
            .arg(json)
            .arg(job.status.as_str())
            .arg(score(at))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        match result {
            -1 => Err(SyncError::JobNotFound { id: job.id }),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    async fn touch(&self, id: Uuid, attempt: u32, now: DateTime<Utc>) -> SyncResult<bool> {
        let Some(job) = self.get(id).await? else {
            return Ok(false);
        };
        let keys = self.queue_keys(&job.queue_name);
        let mut conn = self.conn.clone();
        let touched: i64 = self
            .touch_script
            .key(self.job_key(id))
            .key(&keys.active)
            .arg(id.to_string())
            .arg(attempt)
            .arg(score(now))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(touched == 1)
    }

    async fn get(&self, id: Uuid) -> SyncResult<Option<SyncJob>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.job_key(id))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        raw.map(|json| serde_json::from_str(&json).map_err(SyncError::from))
            .transpose()
    }

    async fn list(&self, queue: &str, status: JobStatus, limit: usize) -> SyncResult<Vec<SyncJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self.queue_keys(queue);
        let stop = limit as isize - 1;
        let mut conn = self.conn.clone();
        let ids: Vec<String> = match status {
            JobStatus::Completed | JobStatus::Failed => {
                let key = if status == JobStatus::Completed {
                    &keys.completed
                } else {
                    &keys.failed
                };
                redis::cmd("ZREVRANGE")
                    .arg(key)
                    .arg(0)
                    .arg(stop)
                    .query_async(&mut conn)
                    .await
                    .map_err(redis_error)?
            }
            JobStatus::Active => redis::cmd("ZRANGE")
                .arg(&keys.active)
                .arg(0)
                .arg(stop)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?,
            JobStatus::Stalled => redis::cmd("SMEMBERS")
                .arg(&keys.stalled)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?,
            JobStatus::Waiting => redis::cmd("ZRANGE")
                .arg(&keys.waiting)
                .arg(0)
                .arg(-1)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?,
        };

        let mut jobs: Vec<SyncJob> = self
            .load_many(ids)
            .await?
            .into_iter()
            .filter(|job| job.status == status)
            .collect();
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_stale_active(
        &self,
        queue: &str,
        older_than: DateTime<Utc>,
    ) -> SyncResult<Vec<SyncJob>> {
        let keys = self.queue_keys(queue);
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&keys.active)
            .arg("-inf")
            .arg(format!("({}", score(older_than)))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(self
            .load_many(ids)
            .await?
            .into_iter()
            .filter(|job| job.status == JobStatus::Active)
            .collect())
    }

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> SyncResult<JobCounts> {
        let keys = self.queue_keys(queue);
        let now_score = score(now).to_string();
        let ready = self.zcount(&keys.waiting, "-inf", &now_score).await?;
        let delayed = self
            .zcount(&keys.waiting, &format!("({now_score}"), "+inf")
            .await?;

        let mut conn = self.conn.clone();
        let (stalled, active, completed, failed): (u64, u64, u64, u64) = redis::pipe()
            .cmd("SCARD")
            .arg(&keys.stalled)
            .cmd("ZCARD")
            .arg(&keys.active)
            .cmd("ZCARD")
            .arg(&keys.completed)
            .cmd("ZCARD")
            .arg(&keys.failed)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        Ok(JobCounts {
            waiting: ready.saturating_sub(stalled),
            delayed,
            active,
            completed,
            failed,
            stalled,
        })
    }

    async fn prune(
        &self,
        queue: &str,
        keep_completed: usize,
        keep_failed: usize,
    ) -> SyncResult<u64> {
        let keys = self.queue_keys(queue);
        let mut removed = 0u64;
        for (key, keep) in [(&keys.completed, keep_completed), (&keys.failed, keep_failed)] {
            let mut conn = self.conn.clone();
            let doomed: Vec<String> = redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(keep)
                .arg(-1)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;
            if doomed.is_empty() {
                continue;
            }
            let job_keys: Vec<String> = doomed
                .iter()
                .filter_map(|id| Uuid::parse_str(id).ok())
                .map(|id| self.job_key(id))
                .collect();
            let mut pipe = redis::pipe();
            pipe.atomic().cmd("ZREM").arg(key).arg(&doomed).ignore();
            if !job_keys.is_empty() {
                pipe.cmd("DEL").arg(&job_keys).ignore();
            }
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(redis_error)?;
            removed += doomed.len() as u64;
        }
        Ok(removed)
    }
}
