//! 优雅关闭协调
//!
//! 长生命周期资源（数据库连接池、Kafka 消费者、HTTP 监听器）在启动时注册到
//! `ShutdownCoordinator`。收到关闭信号后，协调器先通知所有后台任务停止，
//! 再按注册的逆序逐个关闭资源，整体受一个超时约束。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{OrderError, Result};

/// 可关闭的资源
#[async_trait]
pub trait Closer: Send + Sync {
    /// 资源名称，用于日志
    fn name(&self) -> &str;

    async fn close(&self) -> Result<()>;
}

/// 关闭协调器
pub struct ShutdownCoordinator {
    closers: Mutex<Vec<Arc<dyn Closer>>>,
    sender: watch::Sender<bool>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            closers: Mutex::new(Vec::new()),
            sender,
            timeout,
        }
    }

    /// 注册资源，关闭时按注册逆序执行
    pub fn register(&self, closer: Arc<dyn Closer>) {
        info!(resource = closer.name(), "注册可关闭资源");
        self.closers.lock().push(closer);
    }

    /// 订阅关闭信号，值变为 `true` 表示应当停止
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// 广播关闭信号
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// 广播关闭信号并按逆序关闭所有资源
    ///
    /// 单个资源关闭失败只记录日志，不影响其余资源；整体超时返回错误。
    pub async fn close_all(&self) -> Result<()> {
        self.trigger();

        let closers: Vec<Arc<dyn Closer>> = {
            let mut guard = self.closers.lock();
            guard.drain(..).rev().collect()
        };

        let close_in_order = async {
            let mut failed = 0usize;
            for closer in &closers {
                match closer.close().await {
                    Ok(()) => info!(resource = closer.name(), "资源已关闭"),
                    Err(e) => {
                        failed += 1;
                        error!(resource = closer.name(), error = %e, "资源关闭失败");
                    }
                }
            }
            failed
        };

        match tokio::time::timeout(self.timeout, close_in_order).await {
            Ok(0) => {
                info!("所有资源已关闭");
                Ok(())
            }
            Ok(failed) => Err(OrderError::Internal(format!("{failed} 个资源关闭失败"))),
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "关闭资源超时");
                Err(OrderError::Internal("shutdown timed out".to_string()))
            }
        }
    }
}

/// 等待关闭信号
///
/// 发送端已被丢弃时同样视为关闭。
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}

/// 后台任务的关闭包装
///
/// 任务自身订阅关闭信号并自行退出，关闭时只需等待其结束。
pub struct TaskCloser {
    name: String,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskCloser {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            handle: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl Closer for TaskCloser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| OrderError::Internal(format!("任务 {} 异常退出: {e}", self.name))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
        delay: Duration,
    }

    impl Recording {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: log.clone(),
                fail: false,
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl Closer for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        async fn close(&self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().push(self.name.clone());
            if self.fail {
                Err(OrderError::Internal("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_closes_in_reverse_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.register(Recording::new("database", &log));
        coordinator.register(Recording::new("consumer", &log));
        coordinator.register(Recording::new("http", &log));

        let mut rx = coordinator.subscribe();
        coordinator.close_all().await.unwrap();

        assert_eq!(*log.lock(), vec!["http", "consumer", "database"]);
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_closers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.register(Recording::new("database", &log));
        coordinator.register(Arc::new(Recording {
            name: "consumer".to_string(),
            log: log.clone(),
            fail: true,
            delay: Duration::ZERO,
        }));

        assert!(coordinator.close_all().await.is_err());
        assert_eq!(*log.lock(), vec!["consumer", "database"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all_times_out() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.register(Arc::new(Recording {
            name: "slow".to_string(),
            log: log.clone(),
            fail: false,
            delay: Duration::from_secs(10),
        }));

        let err = coordinator.close_all().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        cancelled(&mut rx).await;
    }

    #[tokio::test]
    async fn test_cancelled_observes_trigger() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut rx = coordinator.subscribe();
        coordinator.trigger();
        cancelled(&mut rx).await;
        assert!(coordinator.is_triggered());
    }

    #[tokio::test]
    async fn test_task_closer_waits_for_task_exit() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut rx = coordinator.subscribe();
        let exited = Arc::new(Mutex::new(false));
        let flag = exited.clone();

        let handle = tokio::spawn(async move {
            cancelled(&mut rx).await;
            *flag.lock() = true;
        });
        coordinator.register(TaskCloser::new("worker", handle));

        tokio_test::assert_ok!(coordinator.close_all().await);
        assert!(*exited.lock());
    }

    #[tokio::test]
    async fn test_task_closer_reports_panicked_task() {
        let handle = tokio::spawn(async { panic!("boom") });
        let closer = TaskCloser::new("worker", handle);

        tokio_test::assert_err!(closer.close().await);
        // 第二次关闭为空操作
        tokio_test::assert_ok!(closer.close().await);
    }
}
