//! 数据仓储层接口定义
//!
//! - `CanonicalRepository` - 规范库的版本行与变更事件
//! - `SyncRunRepository` - 同步运行记录
//!
//! 规范库只由对账引擎写入。同一自然键的并发写入依靠唯一约束串行化，
//! 而不是显式加锁：
//! - 只追加实体（税率）在 `(entity_type, natural_key, effective_date, content_hash)` 上唯一
//! - 原地更新的实体在 `(entity_type, natural_key)` 上唯一，更新时比对旧摘要

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{CanonicalRecord, ChangeEvent, EntityType, NewCanonicalRecord, SyncRun};
use crate::SyncResult;

/// 写入版本行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(CanonicalRecord),
    /// 违反唯一约束，未写入任何内容
    Duplicate,
}

/// 规范库仓储接口
#[async_trait]
pub trait CanonicalRepository: Send + Sync {
    /// 某自然键的全部版本，按版本顺序升序
    async fn find_versions(
        &self,
        entity_type: EntityType,
        natural_key: &str,
    ) -> SyncResult<Vec<CanonicalRecord>>;

    /// 在一个事务内插入新行及其变更事件
    async fn insert_version(
        &self,
        record: &NewCanonicalRecord,
        events: &[ChangeEvent],
    ) -> SyncResult<InsertOutcome>;

    /// 原地更新一行及其变更事件；当前摘要不等于 `expected_hash` 时不写入并返回 `false`
    async fn update_in_place(
        &self,
        id: i64,
        record: &NewCanonicalRecord,
        expected_hash: &str,
        events: &[ChangeEvent],
    ) -> SyncResult<bool>;

    async fn list_events(&self, run_id: Option<Uuid>, limit: usize)
        -> SyncResult<Vec<ChangeEvent>>;

    async fn count_records(&self, entity_type: EntityType) -> SyncResult<u64>;
}

/// 同步运行仓储接口
#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn create(&self, run: &SyncRun) -> SyncResult<()>;

    async fn update(&self, run: &SyncRun) -> SyncResult<()>;

    async fn get(&self, run_id: Uuid) -> SyncResult<Option<SyncRun>>;

    /// 最近开始的一次运行
    async fn latest(&self) -> SyncResult<Option<SyncRun>>;

    async fn list_running(&self) -> SyncResult<Vec<SyncRun>>;
}
