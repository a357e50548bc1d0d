//! 处理统计
//!
//! Dispatcher 在每条消息处理前后调用，记录耗时与结果。

use std::time::Instant;

use user_sync_shared::observability::metrics::record_user_event;

#[cfg_attr(test, mockall::automock)]
pub trait Stats: Send + Sync {
    /// 开始计时
    fn start(&self) -> Instant;

    /// 记录一次处理结果，无论成败都会调用
    fn track(&self, started: Instant, success: bool);
}

/// 写入 Prometheus 指标，按路由键打标签
pub struct MetricsStats {
    routing_key: String,
}

impl MetricsStats {
    pub fn new(routing_key: &str) -> Self {
        Self {
            routing_key: routing_key.to_string(),
        }
    }
}

impl Stats for MetricsStats {
    fn start(&self) -> Instant {
        Instant::now()
    }

    fn track(&self, started: Instant, success: bool) {
        record_user_event(&self.routing_key, success, started.elapsed().as_secs_f64());
    }
}
