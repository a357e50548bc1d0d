//! 处理指标
//!
//! 通过 `metrics` 门面记录，由 Prometheus recorder 汇总，
//! 再由一个独立的 axum 服务以 `/metrics` 暴露给抓取方，`/health` 供存活探针使用。

use std::net::SocketAddr;

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ObservabilityConfig;
use crate::error::InfraError;

/// 按 routing_key 与 outcome（success / failure）计数
pub const EVENTS_TOTAL: &str = "user_events_total";
/// 按 routing_key 统计单条消息处理耗时
pub const EVENT_DURATION_SECONDS: &str = "user_event_duration_seconds";

/// 指标 HTTP 服务
pub struct MetricsServer {
    task: JoinHandle<()>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// 安装全局 recorder 并启动指标服务
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsServer, InfraError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| InfraError::Observability(format!("Prometheus recorder 安装失败: {e}")))?;

    describe();
    metrics::gauge!("worker_info", "service" => config.service_name.clone()).set(1.0);

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
        .await
        .map_err(|e| {
            InfraError::Observability(format!("指标端口 {} 绑定失败: {e}", config.metrics_port))
        })?;
    serve(listener, handle)
}

fn describe() {
    metrics::describe_counter!(EVENTS_TOTAL, "Consumed user events by routing key and outcome");
    metrics::describe_histogram!(
        EVENT_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent handling one user event"
    );
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| std::future::ready("OK")))
}

fn serve(listener: TcpListener, handle: PrometheusHandle) -> Result<MetricsServer, InfraError> {
    let addr = listener
        .local_addr()
        .map_err(|e| InfraError::Observability(e.to_string()))?;

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(handle)).await {
            error!(error = %e, "指标服务异常退出");
        }
    });

    info!(%addr, "指标服务已启动");
    Ok(MetricsServer { task, addr })
}

/// 记录一条用户事件的处理结果与耗时
pub fn record_user_event(routing_key: &str, success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failure" };

    metrics::counter!(
        EVENTS_TOTAL,
        "routing_key" => routing_key.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(EVENT_DURATION_SECONDS, "routing_key" => routing_key.to_string())
        .record(duration_secs);
}
