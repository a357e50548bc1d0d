//! 消息信封与确认能力
//!
//! Broker 投递（Delivery）由订阅源产生，Dispatcher 将其包装为 [`Message`] 交给处理器。
//! 确认操作（ack / nack / reject）通过 [`Acknowledger`] 抽象，使处理器无需感知具体 Broker，
//! 测试中也可以用记录型实现替换。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::error::InfraError;

/// 消息头：键到任意 JSON 值的映射，顺序无关
pub type Headers = HashMap<String, serde_json::Value>;

/// 确认调用本身失败（通道已关闭、连接断开等）
#[derive(Debug, Clone, Error)]
#[error("消息确认失败: {0}")]
pub struct AckError(pub String);

/// 确认能力
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// 确认处理成功，Broker 删除消息
    async fn ack(&self, multiple: bool) -> Result<(), AckError>;

    /// 否定确认；requeue 为 true 时 Broker 重新投递
    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AckError>;

    /// 拒绝单条消息；requeue 为 false 时直接丢弃
    async fn reject(&self, requeue: bool) -> Result<(), AckError>;
}

/// 订阅源产出的一次投递
pub struct Delivery {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub acker: Arc<dyn Acknowledger>,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// 单个订阅的投递序列；序列结束表示订阅已关闭
pub type DeliveryStream = BoxStream<'static, Result<Delivery, InfraError>>;

/// 订阅源
///
/// 实现方负责声明交换机与队列、完成绑定并以手动确认模式开始消费。
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn consume(&self, routing_key: &str, exchange: &str) -> Result<DeliveryStream, InfraError>;
}

/// 交给处理器的消息
///
/// 每次投递构造一次，由处理器在同一次调用内完成唯一一次确认。
pub struct Message {
    pub body: Vec<u8>,
    pub headers: Headers,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    acker: Arc<dyn Acknowledger>,
}

impl Message {
    pub fn new(acker: Arc<dyn Acknowledger>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            headers: Headers::new(),
            routing_key: String::new(),
            delivery_tag: 0,
            redelivered: false,
            acker,
        }
    }

    pub async fn ack(&self, multiple: bool) -> Result<(), AckError> {
        self.acker.ack(multiple).await
    }

    pub async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AckError> {
        self.acker.nack(multiple, requeue).await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), AckError> {
        self.acker.reject(requeue).await
    }
}

impl From<Delivery> for Message {
    fn from(delivery: Delivery) -> Self {
        Self {
            body: delivery.body,
            headers: delivery.headers,
            routing_key: delivery.routing_key,
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            acker: delivery.acker,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    #[async_trait]
    impl Acknowledger for Calls {
        async fn ack(&self, multiple: bool) -> Result<(), AckError> {
            self.0.lock().unwrap().push(format!("ack({multiple})"));
            Ok(())
        }

        async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AckError> {
            self.0
                .lock()
                .unwrap()
                .push(format!("nack({multiple},{requeue})"));
            Ok(())
        }

        async fn reject(&self, requeue: bool) -> Result<(), AckError> {
            self.0.lock().unwrap().push(format!("reject({requeue})"));
            Err(AckError("channel closed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_message_delegates_to_acknowledger() {
        let calls = Arc::new(Calls::default());
        let msg = Message::new(calls.clone(), b"{}".to_vec());

        msg.ack(false).await.unwrap();
        msg.nack(false, true).await.unwrap();
        assert!(msg.reject(false).await.is_err());

        assert_eq!(
            *calls.0.lock().unwrap(),
            vec!["ack(false)", "nack(false,true)", "reject(false)"]
        );
    }

    #[test]
    fn test_message_from_delivery_keeps_metadata() {
        let delivery = Delivery {
            body: br#"{"username":"foo"}"#.to_vec(),
            headers: Headers::from([("x-trace-id".to_string(), serde_json::json!("abc-123"))]),
            acker: Arc::new(Calls::default()),
            routing_key: "user.created".to_string(),
            delivery_tag: 42,
            redelivered: true,
        };

        let msg = Message::from(delivery);
        assert_eq!(msg.routing_key, "user.created");
        assert_eq!(msg.delivery_tag, 42);
        assert!(msg.redelivered);
        assert_eq!(msg.headers["x-trace-id"], "abc-123");
        assert_eq!(msg.body, br#"{"username":"foo"}"#);
    }

    #[test]
    fn test_new_message_has_empty_headers() {
        let msg = Message::new(Arc::new(Calls::default()), Vec::new());
        assert!(msg.headers.is_empty());
        assert!(!msg.redelivered);
    }
}
