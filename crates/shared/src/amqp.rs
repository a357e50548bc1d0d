//! AMQP 基础设施封装
//!
//! 将 lapin 的底层 API 封装为 [`Subscriber`] 实现：建立连接（带退避重试）、
//! 声明拓扑并以手动确认模式消费，把 lapin 的投递转换为与 Broker 无关的 [`Delivery`]。

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, BasicRejectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info, warn};

use crate::config::AmqpConfig;
use crate::error::InfraError;
use crate::message::{AckError, Acknowledger, Delivery, DeliveryStream, Headers, Subscriber};
use crate::retry::retry_with_policy;

// ---------------------------------------------------------------------------
// 路由常量
// ---------------------------------------------------------------------------

/// 集中管理交换机与路由键，防止字符串散落在各处导致拼写不一致
pub mod routes {
    pub const USERS_EXCHANGE: &str = "users";
    pub const USER_CREATED: &str = "user.created";
    pub const USER_STATUS_CHANGED: &str = "user.status.changed";
    pub const USER_EMAIL_CHANGED: &str = "user.email.changed";
}

// ---------------------------------------------------------------------------
// AmqpAcker
// ---------------------------------------------------------------------------

/// lapin 确认句柄的适配
struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self, multiple: bool) -> Result<(), AckError> {
        self.acker
            .ack(BasicAckOptions { multiple })
            .await
            .map_err(|e| AckError(e.to_string()))
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AckError> {
        self.acker
            .nack(BasicNackOptions { multiple, requeue })
            .await
            .map_err(|e| AckError(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<(), AckError> {
        self.acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| AckError(e.to_string()))
    }
}

/// AMQP 字段值转为普通 JSON 值
///
/// 字符串按 UTF-8 有损解码；十进制数按 scale 还原为浮点；无法表示的浮点（NaN、无穷）为 null。
fn header_value(value: &AMQPValue) -> serde_json::Value {
    use serde_json::Value;

    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(n) => Value::from(*n),
        AMQPValue::ShortShortUInt(n) => Value::from(*n),
        AMQPValue::ShortInt(n) => Value::from(*n),
        AMQPValue::ShortUInt(n) => Value::from(*n),
        AMQPValue::LongInt(n) => Value::from(*n),
        AMQPValue::LongUInt(n) => Value::from(*n),
        AMQPValue::LongLongInt(n) => Value::from(*n),
        AMQPValue::Timestamp(t) => Value::from(*t),
        AMQPValue::Float(f) => serde_json::json!(*f),
        AMQPValue::Double(f) => serde_json::json!(*f),
        AMQPValue::DecimalValue(d) => {
            serde_json::json!(f64::from(d.value) / 10f64.powi(i32::from(d.scale)))
        }
        AMQPValue::ShortString(s) => Value::String(s.as_str().to_string()),
        AMQPValue::LongString(s) => {
            Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::ByteArray(bytes) => {
            Value::String(String::from_utf8_lossy(bytes.as_slice()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            Value::Array(items.as_slice().iter().map(header_value).collect())
        }
        AMQPValue::FieldTable(table) => Value::Object(
            table
                .inner()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), header_value(v)))
                .collect(),
        ),
        AMQPValue::Void => Value::Null,
    }
}

fn headers_from_table(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), header_value(value)))
        .collect()
}

/// 将 lapin 投递转换为拥有所有权、与 Broker 无关的结构
fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(headers_from_table)
        .unwrap_or_default();
    debug!(header_count = headers.len(), "收到 AMQP 投递");

    Delivery {
        body: delivery.data,
        headers,
        acker: Arc::new(AmqpAcker {
            acker: delivery.acker,
        }),
        routing_key: delivery.routing_key.as_str().to_string(),
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
    }
}

// ---------------------------------------------------------------------------
// AmqpClient
// ---------------------------------------------------------------------------

/// 面向业务的 AMQP 客户端
///
/// 持有一条连接；每个订阅使用独立通道，使 prefetch 按订阅生效，
/// 一个订阅的通道异常不会牵连其他订阅。
pub struct AmqpClient {
    connection: Connection,
    queue: String,
    prefetch: u16,
}

impl AmqpClient {
    /// 连接 Broker，连接失败按配置退避重试
    pub async fn connect(config: &AmqpConfig) -> Result<Self, InfraError> {
        let policy = config.connect_policy();
        let connection = retry_with_policy(&policy, "amqp_connect", InfraError::is_retryable, || {
            let url = config.url.clone();
            async move {
                Connection::connect(&url, ConnectionProperties::default())
                    .await
                    .map_err(|e| InfraError::Connection(e.to_string()))
            }
        })
        .await?;

        info!(queue = %config.queue, prefetch = config.prefetch, "AMQP 连接已建立");
        Ok(Self {
            connection,
            queue: config.queue.clone(),
            prefetch: config.prefetch,
        })
    }

    /// 关闭连接，未确认的消息由 Broker 重新投递
    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "worker shutdown").await {
            warn!(error = %e, "关闭 AMQP 连接失败");
        }
    }
}

#[async_trait]
impl Subscriber for AmqpClient {
    /// 声明 topic 交换机与持久化队列，按路由键绑定后开始手动确认消费
    ///
    /// 任一步骤失败都直接返回，不回滚已完成的声明（声明在 Broker 端是幂等的）。
    async fn consume(&self, routing_key: &str, exchange: &str) -> Result<DeliveryStream, InfraError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| InfraError::topology("channel_open", e))?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| InfraError::topology("basic_qos", e))?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| InfraError::topology("exchange_declare", e))?;

        let queue = channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| InfraError::topology("queue_declare", e))?;

        channel
            .queue_bind(
                queue.name().as_str(),
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| InfraError::topology("queue_bind", e))?;

        let consumer_tag = format!("{}.{}", self.queue, routing_key);
        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| InfraError::topology("basic_consume", e))?;

        info!(
            exchange,
            routing_key,
            queue = %self.queue,
            consumer_tag = %consumer_tag,
            "已订阅 AMQP 路由"
        );

        // 通道句柄随消息流存活
        let stream = consumer.map(move |item| {
            let _channel = &channel;
            item.map(into_delivery)
                .map_err(|e| InfraError::Stream(e.to_string()))
        });

        Ok(stream.boxed())
    }
}
