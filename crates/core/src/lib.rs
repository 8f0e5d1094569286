//! 贸易数据同步引擎的核心定义：数据模型、错误类型、配置与能力接口。

pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use errors::*;
pub use traits::{
    CanonicalRepository, InsertOutcome, ItemFailure, JobStore, RateLimiter, RawBatch,
    SourceAdapter, SourceRegistry, SyncRunRepository,
};
