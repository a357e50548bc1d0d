//! 共享库
//!
//! 包含 worker 共用的配置、错误处理、重试、可观测性、消息信封与 AMQP 订阅等基础设施代码，
//! 以及供各服务测试使用的内存订阅源。

pub mod amqp;
pub mod config;
pub mod error;
pub mod message;
pub mod observability;
pub mod retry;
pub mod test_utils;
