//! 测试工具模块
//!
//! 提供不依赖 Broker 的 Mock 实现：记录确认调用的 [`RecordingAcker`]，
//! 以及用内存通道模拟订阅的 [`ChannelSubscriber`]。集成测试和各服务的单元测试共用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;

use crate::error::InfraError;
use crate::message::{AckError, Acknowledger, Delivery, DeliveryStream, Headers, Message, Subscriber};

// ==================== 确认记录 ====================

/// 一次确认调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCall {
    Ack { multiple: bool },
    Nack { multiple: bool, requeue: bool },
    Reject { requeue: bool },
}

/// 记录所有确认调用的 Acknowledger
///
/// `failing()` 构造的实例照常记录调用，但每次都返回错误，用于模拟通道已关闭。
#[derive(Default)]
pub struct RecordingAcker {
    calls: Mutex<Vec<AckCall>>,
    fail: bool,
}

impl RecordingAcker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn calls(&self) -> Vec<AckCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: AckCall) -> Result<(), AckError> {
        self.calls.lock().push(call);
        if self.fail {
            return Err(AckError("channel closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self, multiple: bool) -> Result<(), AckError> {
        self.record(AckCall::Ack { multiple })
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AckError> {
        self.record(AckCall::Nack { multiple, requeue })
    }

    async fn reject(&self, requeue: bool) -> Result<(), AckError> {
        self.record(AckCall::Reject { requeue })
    }
}

/// 用记录型 Acknowledger 构造一条消息
pub fn test_message(body: &[u8]) -> (Message, Arc<RecordingAcker>) {
    let acker = RecordingAcker::new();
    (Message::new(acker.clone(), body.to_vec()), acker)
}

/// 构造一次投递，返回其确认记录
pub fn test_delivery(routing_key: &str, delivery_tag: u64, body: &[u8]) -> (Delivery, Arc<RecordingAcker>) {
    let acker = RecordingAcker::new();
    let delivery = Delivery {
        body: body.to_vec(),
        headers: Headers::new(),
        acker: acker.clone(),
        routing_key: routing_key.to_string(),
        delivery_tag,
        redelivered: false,
    };
    (delivery, acker)
}

// ==================== 内存订阅源 ====================

type DeliverySender = mpsc::UnboundedSender<Result<Delivery, InfraError>>;
type DeliveryReceiver = mpsc::UnboundedReceiver<Result<Delivery, InfraError>>;

#[derive(Default)]
struct Routes {
    senders: HashMap<String, DeliverySender>,
    receivers: HashMap<String, DeliveryReceiver>,
}

impl Routes {
    /// 按路由键惰性创建通道
    fn sender(&mut self, routing_key: &str) -> DeliverySender {
        if let Some(tx) = self.senders.get(routing_key) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::unbounded();
        self.senders.insert(routing_key.to_string(), tx.clone());
        self.receivers.insert(routing_key.to_string(), rx);
        tx
    }
}

/// 以内存通道代替 Broker 的订阅源
///
/// 每个路由键一条通道，只能被消费一次；`close` 丢弃发送端后对应的消息流结束。
#[derive(Default)]
pub struct ChannelSubscriber {
    routes: Mutex<Routes>,
    failing_route: Option<String>,
    subscriptions: Mutex<Vec<(String, String)>>,
}

impl ChannelSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 订阅指定路由键时返回拓扑错误
    pub fn failing_on(routing_key: &str) -> Arc<Self> {
        Arc::new(Self {
            failing_route: Some(routing_key.to_string()),
            ..Self::default()
        })
    }

    pub fn publish(&self, routing_key: &str, delivery: Delivery) {
        let tx = self.routes.lock().sender(routing_key);
        let _ = tx.unbounded_send(Ok(delivery));
    }

    /// 注入一条消息流错误
    pub fn publish_error(&self, routing_key: &str, reason: &str) {
        let tx = self.routes.lock().sender(routing_key);
        let _ = tx.unbounded_send(Err(InfraError::Stream(reason.to_string())));
    }

    pub fn close(&self, routing_key: &str) {
        let mut routes = self.routes.lock();
        // 确保先建立通道，未订阅时关闭也能让之后的消费立即结束
        let _ = routes.sender(routing_key);
        routes.senders.remove(routing_key);
    }

    /// 已成功建立的订阅：(routing_key, exchange)
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.subscriptions.lock().clone()
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn consume(&self, routing_key: &str, exchange: &str) -> Result<DeliveryStream, InfraError> {
        if self.failing_route.as_deref() == Some(routing_key) {
            return Err(InfraError::topology("queue_bind", "ACCESS_REFUSED"));
        }

        let mut routes = self.routes.lock();
        if !routes.receivers.contains_key(routing_key) && !routes.senders.contains_key(routing_key) {
            let _ = routes.sender(routing_key);
        }
        let rx = routes
            .receivers
            .remove(routing_key)
            .ok_or_else(|| InfraError::topology("basic_consume", "路由已被消费"))?;
        drop(routes);

        self.subscriptions
            .lock()
            .push((routing_key.to_string(), exchange.to_string()));

        Ok(rx.boxed())
    }
}
