//! 统一错误处理模块
//!
//! 定义基础设施层（配置、可观测性、Broker 连接与拓扑）共享的错误类型，
//! 使用 thiserror 提供良好的错误信息。业务层错误由各服务自行定义并通过 `#[from]` 透传。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum InfraError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== Broker 错误 ====================
    #[error("Broker 连接失败: {0}")]
    Connection(String),

    #[error("订阅拓扑建立失败: 阶段={stage}, 原因={reason}")]
    Topology { stage: &'static str, reason: String },

    #[error("消息流错误: {0}")]
    Stream(String),

    // ==================== 可观测性错误 ====================
    #[error("可观测性初始化失败: {0}")]
    Observability(String),
}

impl InfraError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Topology { .. } => "TOPOLOGY_ERROR",
            Self::Stream(_) => "STREAM_ERROR",
            Self::Observability(_) => "OBSERVABILITY_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有连接阶段的失败值得退避重试；拓扑声明失败通常意味着
    /// 与 Broker 上已有定义冲突，重试不会改变结果。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn topology(stage: &'static str, reason: impl ToString) -> Self {
        Self::Topology {
            stage,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = InfraError::topology("queue_bind", "access refused");
        assert_eq!(err.code(), "TOPOLOGY_ERROR");
        assert_eq!(
            err.to_string(),
            "订阅拓扑建立失败: 阶段=queue_bind, 原因=access refused"
        );
    }

    #[test]
    fn test_is_retryable() {
        let conn_err = InfraError::Connection("connection refused".to_string());
        assert!(conn_err.is_retryable());

        let topo_err = InfraError::topology("exchange_declare", "PRECONDITION_FAILED");
        assert!(!topo_err.is_retryable());
    }
}
