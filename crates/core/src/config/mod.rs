//! 配置管理
//!
//! 配置按以下顺序合并：内置默认值 → TOML 配置文件 → `TRADESYNC__` 前缀的环境变量。
//!
//! ```rust,no_run
//! use tradesync_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/tradesync.toml")).expect("加载配置失败");
//! println!("队列后端: {:?}", config.queue.backend);
//! ```

pub mod models;

pub use models::*;

#[cfg(test)]
mod tests;
