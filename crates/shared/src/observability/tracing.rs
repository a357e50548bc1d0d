//! 日志订阅器
//!
//! 生产环境输出单行 JSON 便于采集，开发环境输出紧凑的彩色文本。

use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;
use crate::error::InfraError;

/// lapin 在连接重试期间会刷出大量内部日志，默认压到 warn
const QUIET_DEPENDENCIES: &str = "lapin=warn";

/// RUST_LOG 优先；否则使用配置的级别，配置无法解析时退回 info
pub fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directives = if config.log_level.contains("lapin") {
        config.log_level.clone()
    } else {
        format!("{},{QUIET_DEPENDENCIES}", config.log_level)
    };
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn output_layer(config: &ObservabilityConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    if config.json_logs() {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().compact().with_target(false).boxed()
    }
}

/// 安装全局订阅器，同一进程只能成功一次
pub fn init(config: &ObservabilityConfig) -> Result<(), InfraError> {
    tracing_subscriber::registry()
        .with(output_layer(config))
        .with(build_filter(config))
        .try_init()
        .map_err(|e| InfraError::Observability(format!("日志订阅器已存在或无法安装: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_level_does_not_panic() {
        let config = ObservabilityConfig {
            log_level: "debug,[[[".to_string(),
            ..Default::default()
        };
        let _ = build_filter(&config);
    }

    #[test]
    fn test_init_only_once() {
        let config = ObservabilityConfig::default();
        let _ = init(&config);
        let second = init(&config);
        assert_eq!(second.unwrap_err().code(), "OBSERVABILITY_ERROR");
    }
}
