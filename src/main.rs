use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tradesync::shutdown::{drain, wait_for_signal, DEFAULT_DRAIN_TIMEOUT};
use tradesync::{AppMode, Application, ShutdownManager};
use tradesync_core::config::{AppConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("tradesync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("贸易数据同步引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认位置查找"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["dispatcher", "worker", "api", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    // .env 文件可选
    let _ = dotenvy::dotenv();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some(_) => LogFormat::Pretty,
        None => config.observability.log_format.clone(),
    };
    init_logging(&log_level, &log_format)?;

    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all");
    info!("启动贸易数据同步引擎");
    info!("运行模式: {mode_str}");

    let mode = AppMode::parse(mode_str, &config)?;
    let app = Arc::new(Application::new(config, mode).await?);
    let shutdown = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown.shutdown();

    if drain(app_handle, DEFAULT_DRAIN_TIMEOUT).await {
        info!("应用已优雅关闭");
    } else {
        error!("应用关闭超时，强制退出");
    }

    info!("贸易数据同步引擎已退出");
    Ok(())
}

/// 初始化日志系统；设置了 RUST_LOG 时以其为准
fn init_logging(log_level: &str, log_format: &LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}
