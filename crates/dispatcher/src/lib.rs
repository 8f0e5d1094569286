//! 调度端：同步编排、运行跟踪、停滞检测与定时触发
//!
//! 编排器只负责创建运行并投递任务，任务结果由运行跟踪器异步汇总到 `SyncRun`。

pub mod orchestrator;
pub mod run_tracker;
pub mod scheduler;
pub mod stall_detector;

pub use orchestrator::SyncOrchestrator;
pub use run_tracker::RunTracker;
pub use scheduler::{CronScheduler, SyncScheduler};
pub use stall_detector::StallDetector;
