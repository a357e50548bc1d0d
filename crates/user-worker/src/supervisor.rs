//! 任务监督
//!
//! 所有订阅的 Dispatcher 与信号监听作为同级任务运行在同一个 [`JoinSet`] 中，
//! 共享一个 `watch` 取消通道。任一任务结束即广播取消，等待其余任务全部退出后，
//! 返回最先结束的任务的结果。

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::WorkerError;

/// 等待取消信号
///
/// 值变为 true 或发送端被丢弃都视为取消。
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub struct Supervisor {
    tasks: JoinSet<Result<(), WorkerError>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            shutdown_tx,
        }
    }

    /// 新任务使用的取消接收端
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 运行一个同级任务，任务需自行监听取消信号
    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let shutdown = self.shutdown_receiver();
        self.tasks.spawn(task(shutdown));
    }

    pub fn spawn_dispatcher(&mut self, dispatcher: Dispatcher) {
        self.spawn(move |shutdown| dispatcher.run(shutdown));
    }

    /// 监听 SIGINT / SIGTERM，收到后以 [`WorkerError::Signal`] 结束
    pub fn spawn_signal_watcher(&mut self) {
        self.spawn(|mut shutdown| async move {
            tokio::select! {
                biased;

                _ = cancelled(&mut shutdown) => Err(WorkerError::Cancelled),
                signal = wait_for_shutdown_signal() => Err(WorkerError::Signal(signal?)),
            }
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 运行直到第一个任务结束，然后取消并等待其余任务
    ///
    /// 空组直接返回 Ok。
    pub async fn run(mut self) -> Result<(), WorkerError> {
        let Some(first) = self.tasks.join_next().await else {
            return Ok(());
        };
        let outcome = flatten(first);

        match &outcome {
            Ok(()) => info!("任务已结束，停止其余任务"),
            Err(e) if e.is_graceful() => info!(reason = %e, "开始优雅关闭"),
            Err(e) => warn!(error = %e, code = e.code(), "任务异常结束，停止其余任务"),
        }

        let _ = self.shutdown_tx.send(true);

        let remaining = self.tasks.len();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = flatten(joined) {
                if !matches!(e, WorkerError::Cancelled) {
                    warn!(error = %e, "任务在关闭过程中出错");
                }
            }
        }
        info!(stopped = remaining, "所有任务已退出");

        outcome
    }
}

fn flatten(joined: Result<Result<(), WorkerError>, tokio::task::JoinError>) -> Result<(), WorkerError> {
    joined.unwrap_or_else(|e| Err(WorkerError::TaskAborted(e.to_string())))
}

/// 监听 SIGINT 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str, WorkerError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str, WorkerError> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
