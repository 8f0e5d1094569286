//! 任务队列层
//!
//! 每个同步领域一个队列（products / tariff-rates / trade-updates），另有一个维护用的
//! cleanup 队列。所有队列共享同一套策略：
//!
//! - 最多尝试 `max_attempts` 次，失败后按指数退避重新排队
//! - 重试耗尽的任务保留在 failed 集合中供运维查看
//! - 心跳超时的任务标记为 stalled 并重新排队一次，再次停滞即进入死信
//! - 状态变化通过通道报告给编排器

mod job_queue;
mod memory_store;
mod redis_store;
mod registry;
mod retry;

pub use job_queue::{JobQueue, QueueSettings};
pub use memory_store::InMemoryJobStore;
pub use redis_store::RedisJobStore;
pub use registry::{QueueRegistry, QueueSnapshot};
pub use retry::RetryPolicy;
