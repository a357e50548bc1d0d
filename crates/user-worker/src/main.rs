//! 用户事件 worker
//!
//! 订阅 `users` 交换机上的用户事件并写入进程内存储。
//! 收到 SIGINT / SIGTERM 时停止所有订阅并以 0 退出；其他原因导致的停止以非 0 退出。

use std::sync::Arc;

use tracing::{error, info, warn};
use user_sync_shared::amqp::AmqpClient;
use user_sync_shared::config::AppConfig;
use user_sync_shared::observability;
use user_worker::register::{registrations, subscribe_all};
use user_worker::stats::{MetricsStats, Stats};
use user_worker::store::InMemoryUserStore;
use user_worker::supervisor::Supervisor;

const SERVICE_NAME: &str = "user-worker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 加载配置；失败时回退到默认值（日志尚未初始化，错误延后输出）
    let (config, config_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::fallback(SERVICE_NAME), Some(e)),
    };

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(
        environment = %config.environment,
        queue = %config.amqp.queue,
        prefetch = config.amqp.prefetch,
        "Starting user-worker..."
    );

    // 3. 连接 Broker
    let client = AmqpClient::connect(&config.amqp).await.inspect_err(|e| {
        error!(error = %e, code = e.code(), "无法连接 Broker");
    })?;

    // 4. 建立订阅
    let store = Arc::new(InMemoryUserStore::new());
    let mut supervisor = Supervisor::new();
    if let Err(e) = subscribe_all(
        &mut supervisor,
        &client,
        registrations(store),
        |routing_key| -> Arc<dyn Stats> { Arc::new(MetricsStats::new(routing_key)) },
    )
    .await
    {
        error!(error = %e, code = e.code(), "建立订阅失败");
        client.close().await;
        return Err(e.into());
    }
    supervisor.spawn_signal_watcher();

    // 5. 运行直到任一任务结束
    let outcome = supervisor.run().await;
    client.close().await;

    match outcome {
        Ok(()) => {
            info!("user-worker stopped");
            Ok(())
        }
        Err(e) if e.is_graceful() => {
            info!(reason = %e, "user-worker shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "user-worker stopped unexpectedly");
            Err(e.into())
        }
    }
}
