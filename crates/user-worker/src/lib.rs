//! 用户事件 worker
//!
//! 从 AMQP 的 `users` 交换机消费用户生命周期事件（创建、状态变更、邮箱变更），
//! 写入用户存储，并根据处理结果确认或重新入队。
//! 每个路由键一个 Dispatcher，全部作为同级任务由 Supervisor 管理，任一退出即整体停止。

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod model;
pub mod register;
pub mod stats;
pub mod store;
pub mod supervisor;
