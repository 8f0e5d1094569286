//! 基础设施层：限流器、任务队列、规范库与运行记录的存储实现。

pub mod database;
pub mod queue;
pub mod rate_limiter;
pub mod redis_connection;

pub use database::*;
pub use queue::*;
pub use rate_limiter::*;
