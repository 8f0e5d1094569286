use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 收到关闭信号后等待各组件退出的默认上限
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 优雅关闭管理器
///
/// 所有长期运行的组件订阅同一个广播通道；`shutdown` 只会生效一次。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号；已经关闭时返回的接收器会立即收到信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_shutdown() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.shutdown_tx.subscribe()
    }

    /// 广播发送端，供按需订阅的组件使用
    pub fn sender(&self) -> &broadcast::Sender<()> {
        &self.shutdown_tx
    }

    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        let subscribers = self.shutdown_tx.receiver_count();
        info!(subscribers, "触发系统关闭");
        // 没有订阅者时发送失败，忽略
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// 一个在关闭后完成的 future，用于 HTTP 服务的优雅停止
    pub fn signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 在上限内等待 `task` 完成；超时返回 false
pub async fn drain<F>(task: F, limit: Duration) -> bool
where
    F: Future,
{
    match tokio::time::timeout(limit, task).await {
        Ok(_) => true,
        Err(_) => {
            warn!(timeout = ?limit, "等待组件退出超时");
            false
        }
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
