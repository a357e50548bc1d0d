//! 可观测性
//!
//! 日志与指标的统一入口。进程启动时调用一次 [`init`]，持有返回的守卫直到退出。

pub mod metrics;
pub mod tracing;

use ::tracing::{debug, info};
use serde::Deserialize;

use crate::error::InfraError;

/// 对应配置文件中的 `[observability]` 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 由启动代码注入，配置文件中无需填写
    pub service_name: String,
    /// EnvFilter 语法，如 "info" 或 "info,user_worker=debug"；RUST_LOG 优先
    pub log_level: String,
    /// "json" 或 "pretty"
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "user-worker".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 持有指标服务，Drop 时停止
#[must_use = "守卫被丢弃后指标服务立即停止"]
pub struct ObservabilityGuard {
    metrics: Option<metrics::MetricsServer>,
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Some(server) = self.metrics.take() {
            debug!(addr = %server.local_addr(), "停止指标服务");
            server.stop();
        }
    }
}

/// 先装日志，再按配置启动指标服务
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard, InfraError> {
    tracing::init(config)?;

    let metrics = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        log_format = %config.log_format,
        metrics_port = ?metrics.as_ref().map(|m| m.local_addr().port()),
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard { metrics })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.metrics_port, 9090);
        assert!(config.metrics_enabled);
        assert!(!config.json_logs());
    }

    #[test]
    fn test_json_format_is_case_insensitive() {
        let config = ObservabilityConfig {
            log_format: "JSON".to_string(),
            ..Default::default()
        }
        .with_service_name("user-worker-2");

        assert_eq!(config.service_name, "user-worker-2");
        assert!(config.json_logs());
    }
}
