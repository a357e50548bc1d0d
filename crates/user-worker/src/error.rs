//! 用户事件 worker 错误类型
//!
//! 三层错误各自封闭：存储错误决定确认策略，处理器错误折叠进统计结果，
//! worker 错误在监督组内传播并决定进程退出码。

use thiserror::Error;
use user_sync_shared::error::InfraError;
use user_sync_shared::message::AckError;

/// 存储错误
///
/// 处理器按类型匹配：Conflict / NotFound 为永久错误（确认丢弃），其余为瞬时错误（重新入队）。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("用户名已存在: {username}")]
    Conflict { username: String },

    #[error("用户不存在: id={id}")]
    NotFound { id: u64 },

    #[error("存储不可用: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "CONFLICT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

/// 单条消息处理错误，不会越过 Dispatcher 边界
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("消息体解码失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Acknowledgment(#[from] AckError),
}

impl HandlerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_ERROR",
            Self::Store(e) => e.code(),
            Self::Acknowledgment(_) => "ACK_ERROR",
        }
    }
}

/// 监督组内任务的终止原因
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("订阅已取消")]
    Cancelled,

    #[error("收到终止信号: {0}")]
    Signal(&'static str),

    #[error("订阅消息流已关闭: routing_key={routing_key}")]
    SubscriptionClosed { routing_key: String },

    #[error("注册信号监听失败: {0}")]
    SignalSetup(#[from] std::io::Error),

    #[error("任务异常退出: {0}")]
    TaskAborted(String),

    /// 透传共享库错误（连接、拓扑等）
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl WorkerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::Signal(_) => "SIGNAL",
            Self::SubscriptionClosed { .. } => "SUBSCRIPTION_CLOSED",
            Self::SignalSetup(_) => "SIGNAL_SETUP_ERROR",
            Self::TaskAborted(_) => "TASK_ABORTED",
            Self::Infra(e) => e.code(),
        }
    }

    /// 信号触发的停止属于正常关闭
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Signal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Conflict {
            username: "foo".to_string(),
        };
        assert_eq!(err.to_string(), "用户名已存在: foo");

        let err = StoreError::NotFound { id: 3 };
        assert_eq!(err.to_string(), "用户不存在: id=3");

        let err = HandlerError::from(StoreError::Unavailable("磁盘已满".to_string()));
        assert_eq!(err.to_string(), "存储不可用: 磁盘已满");
        assert_eq!(err.code(), "STORE_UNAVAILABLE");

        let err = WorkerError::SubscriptionClosed {
            routing_key: "user.created".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "订阅消息流已关闭: routing_key=user.created"
        );

        let err = WorkerError::from(InfraError::Connection("refused".to_string()));
        assert_eq!(err.to_string(), "Broker 连接失败: refused");
    }

    #[test]
    fn test_graceful_only_for_signal() {
        assert!(WorkerError::Signal("SIGTERM").is_graceful());
        assert!(!WorkerError::Cancelled.is_graceful());
    }

    #[test]
    fn test_worker_code_passes_through_infra() {
        let err = WorkerError::from(InfraError::topology("queue_declare", "ACCESS_REFUSED"));
        assert_eq!(err.code(), "TOPOLOGY_ERROR");
        assert_eq!(WorkerError::Cancelled.code(), "CANCELLED");
    }
}
