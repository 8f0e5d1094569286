//! # 数据模型
//!
//! 贸易数据同步引擎的核心数据结构。
//!
//! ## 核心模型
//!
//! - [`SourceRecord`] - 适配器规范化后的一条外部数据，带内容摘要
//! - [`CanonicalRecord`] - 规范库中持久化的实体版本
//! - [`ChangeEvent`] - 对账产生的字段级变更事件
//! - [`SyncJob`] - 队列中的工作单元
//! - [`SyncRun`] - 一次编排运行的聚合状态
//!
//! ## 状态流转
//!
//! ### 任务状态
//! ```text
//! Waiting → Active → Completed
//!    ↑        ↓
//!    └── (重试/停滞重排) ──→ Failed
//! ```
//!
//! ### 运行状态
//! ```text
//! Running → Completed | PartiallyFailed | Failed | TimedOut
//! ```
//!
//! 所有时间字段使用 `DateTime<Utc>`，对外序列化使用 camelCase。

pub mod canonical;
pub mod change_event;
pub mod job;
pub mod record;
pub mod run;

pub use canonical::*;
pub use change_event::*;
pub use job::*;
pub use record::*;
pub use run::*;
