pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod queue;
pub mod rate_limit;
pub mod sources;
pub mod sync;

pub use api_observability::{ApiConfig, LogFormat, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::{DatabaseBackend, DatabaseConfig};
pub use queue::{QueueBackend, QueueConfig, RedisConfig};
pub use rate_limit::{RateLimitBackend, RateLimitConfig, WindowConfig};
pub use sources::{SourceConfig, SourcesConfig};
pub use sync::SyncConfig;
