//! 用户事件处理器
//!
//! 每种事件一个处理器：解码消息体、调用存储，再根据结果决定确认方式。
//!
//! 确认策略：
//! - 成功、解码失败、永久性存储错误（用户名冲突 / 用户不存在）：ack，消息不再投递
//! - 其他存储错误：nack 并重新入队，等待下一次投递
//!
//! 每次处理恰好发出一次确认调用，且只确认当前消息。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};
use user_sync_shared::message::Message;

use crate::error::{HandlerError, StoreError};
use crate::model::User;
use crate::store::UserStore;

/// 单条消息处理器
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// 处理 `user.created`：新增用户
pub struct UserCreated {
    store: Arc<dyn UserStore>,
}

impl UserCreated {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for UserCreated {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let user = decode(message).await?;
        let username = user.username.clone();

        match self.store.add(user) {
            Ok(id) => {
                debug!(user_id = id, username = %username, "用户已创建");
                acknowledge(message).await
            }
            Err(e @ StoreError::Conflict { .. }) => {
                warn!(username = %username, "用户名已存在，丢弃创建事件");
                discard(message, e).await
            }
            Err(e) => requeue(message, e).await,
        }
    }
}

/// 处理 `user.status.changed`：按 ID 覆盖用户记录
pub struct UserStatusChanged {
    store: Arc<dyn UserStore>,
}

impl UserStatusChanged {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for UserStatusChanged {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let user = decode(message).await?;
        debug!(user_id = user.id, status = %user.status, "更新用户状态");
        save(self.store.as_ref(), message, user).await
    }
}

/// 处理 `user.email.changed`：按 ID 覆盖用户记录
pub struct UserEmailChanged {
    store: Arc<dyn UserStore>,
}

impl UserEmailChanged {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for UserEmailChanged {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let user = decode(message).await?;
        debug!(user_id = user.id, "更新用户邮箱");
        save(self.store.as_ref(), message, user).await
    }
}

/// 状态变更与邮箱变更共用：整条记录替换
async fn save(store: &dyn UserStore, message: &Message, user: User) -> Result<(), HandlerError> {
    let id = user.id;
    match store.save(user) {
        Ok(()) => acknowledge(message).await,
        Err(e @ StoreError::NotFound { .. }) => {
            warn!(user_id = id, "用户不存在，丢弃变更事件");
            discard(message, e).await
        }
        Err(e) => requeue(message, e).await,
    }
}

/// 解码消息体；无法解码的消息重投也不会成功，直接确认丢弃
async fn decode(message: &Message) -> Result<User, HandlerError> {
    match serde_json::from_slice::<User>(&message.body) {
        Ok(user) => Ok(user),
        Err(e) => {
            warn!(
                routing_key = %message.routing_key,
                delivery_tag = message.delivery_tag,
                error = %e,
                "消息体解码失败，丢弃消息"
            );
            discard(message, e).await
        }
    }
}

/// 处理成功：确认失败时把错误返回给调用方，使统计记为失败
async fn acknowledge(message: &Message) -> Result<(), HandlerError> {
    message.ack(false).await.map_err(|e| {
        error!(delivery_tag = message.delivery_tag, error = %e, "确认消息失败");
        HandlerError::from(e)
    })
}

/// 永久性失败：确认丢弃并返回原始错误
async fn discard<T, E>(message: &Message, cause: E) -> Result<T, HandlerError>
where
    E: Into<HandlerError>,
{
    if let Err(e) = message.ack(false).await {
        error!(delivery_tag = message.delivery_tag, error = %e, "确认消息失败");
    }
    Err(cause.into())
}

/// 瞬时失败：重新入队并返回原始错误
async fn requeue<T>(message: &Message, cause: StoreError) -> Result<T, HandlerError> {
    warn!(
        routing_key = %message.routing_key,
        delivery_tag = message.delivery_tag,
        error = %cause,
        "存储暂不可用，消息重新入队"
    );
    if let Err(e) = message.nack(false, true).await {
        error!(delivery_tag = message.delivery_tag, error = %e, "拒绝消息失败");
    }
    Err(cause.into())
}
