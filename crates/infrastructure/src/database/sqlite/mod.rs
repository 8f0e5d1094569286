mod canonical_repository;
mod sync_run_repository;

pub use canonical_repository::SqliteCanonicalRepository;
pub use sync_run_repository::SqliteSyncRunRepository;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tradesync_core::config::DatabaseConfig;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的SQLite URL: {}", config.url))?
            .create_if_missing(true);

        // 内存数据库只在单个连接内存在
        let in_memory = config.url.contains(":memory:");
        let (max, min) = if in_memory {
            (1, 1)
        } else {
            (config.max_connections, config.min_connections)
        };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max)
            .min_connections(min)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        } else {
            pool_options = pool_options
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .context("连接SQLite数据库失败")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("执行数据库迁移失败")?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
