//! 贸易数据同步引擎的进程入口：按运行模式组装各组件并负责优雅关闭。

pub mod app;
pub mod shutdown;

pub use app::{AppMode, Application};
pub use shutdown::ShutdownManager;
