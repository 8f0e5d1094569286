//! 工作者：数据源适配器、任务处理器与按队列划分的工作者池

pub mod adapters;
pub mod pool;
pub mod processor;

pub use adapters::{build_registry, OutboundThrottle, SourceHttpClient};
pub use pool::{QueueWorker, WorkerPool};
pub use processor::{CleanupProcessor, JobProcessor, SyncJobProcessor};
