//! 订阅分发循环
//!
//! 一个 Dispatcher 对应一个 (routing_key, exchange) 订阅：逐条接收投递、
//! 包装为 [`Message`] 交给处理器，并把耗时与结果交给统计。
//! 同一订阅内严格串行，处理器返回之前不会拉取下一条投递。

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use user_sync_shared::error::InfraError;
use user_sync_shared::message::{DeliveryStream, Message, Subscriber};

use crate::error::WorkerError;
use crate::handler::Handler;
use crate::stats::Stats;
use crate::supervisor::cancelled;

pub struct Dispatcher {
    routing_key: String,
    exchange: String,
    deliveries: DeliveryStream,
    handler: Arc<dyn Handler>,
    stats: Arc<dyn Stats>,
}

impl Dispatcher {
    /// 建立订阅；订阅失败时不会产生 Dispatcher
    pub async fn subscribe(
        routing_key: &str,
        exchange: &str,
        subscriber: &dyn Subscriber,
        handler: Arc<dyn Handler>,
        stats: Arc<dyn Stats>,
    ) -> Result<Self, InfraError> {
        let deliveries = subscriber.consume(routing_key, exchange).await?;

        Ok(Self {
            routing_key: routing_key.to_string(),
            exchange: exchange.to_string(),
            deliveries,
            handler,
            stats,
        })
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// 运行分发循环，直到取消或消息流结束
    ///
    /// 取消信号优先于下一条投递；正在处理的消息总会完成并确认。
    /// 循环从不返回 Ok：取消返回 `Cancelled`，消息流结束返回 `SubscriptionClosed`。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(
            routing_key = %self.routing_key,
            exchange = %self.exchange,
            "分发循环已启动"
        );

        loop {
            let next = tokio::select! {
                biased;

                _ = cancelled(&mut shutdown) => None,
                next = self.deliveries.next() => Some(next),
            };

            match next {
                None => {
                    info!(routing_key = %self.routing_key, "收到关闭信号，分发循环退出");
                    return Err(WorkerError::Cancelled);
                }
                Some(None) => {
                    warn!(routing_key = %self.routing_key, "订阅消息流已结束");
                    return Err(WorkerError::SubscriptionClosed {
                        routing_key: self.routing_key.clone(),
                    });
                }
                Some(Some(Ok(delivery))) => {
                    dispatch(
                        &self.routing_key,
                        self.handler.as_ref(),
                        self.stats.as_ref(),
                        Message::from(delivery),
                    )
                    .await;
                }
                Some(Some(Err(e))) => {
                    error!(routing_key = %self.routing_key, error = %e, "接收投递出错");
                }
            }
        }
    }
}

/// 处理单条消息：计时、调用处理器、记录结果
///
/// 处理器错误在此终结，只写日志并计入统计。
async fn dispatch(routing_key: &str, handler: &dyn Handler, stats: &dyn Stats, message: Message) {
    let started = stats.start();
    debug!(
        routing_key,
        delivery_tag = message.delivery_tag,
        redelivered = message.redelivered,
        "收到投递"
    );

    let result = handler.handle(&message).await;
    if let Err(e) = &result {
        warn!(
            routing_key,
            delivery_tag = message.delivery_tag,
            code = e.code(),
            error = %e,
            "处理消息失败"
        );
    }

    stats.track(started, result.is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use user_sync_shared::test_utils::{AckCall, ChannelSubscriber, test_delivery};

    use crate::error::{HandlerError, StoreError};
    use crate::stats::MockStats;

    /// 按投递顺序记录 delivery_tag；消息体为 "fail" 时返回错误
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Handler for RecordingHandler {
        async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
            self.seen.lock().push(message.delivery_tag);
            message.ack(false).await?;
            if message.body == b"fail" {
                return Err(StoreError::Unavailable("fail".to_string()).into());
            }
            Ok(())
        }
    }

    fn recording_stats() -> (Arc<MockStats>, Arc<Mutex<Vec<bool>>>) {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let mut stats = MockStats::new();
        stats.expect_start().returning(Instant::now);
        let sink = outcomes.clone();
        stats
            .expect_track()
            .returning(move |_, success| sink.lock().push(success));
        (Arc::new(stats), outcomes)
    }

    #[tokio::test]
    async fn test_dispatches_in_order_and_tracks_outcome() {
        let subscriber = ChannelSubscriber::new();
        let handler = Arc::new(RecordingHandler::default());
        let (stats, outcomes) = recording_stats();

        let dispatcher = Dispatcher::subscribe(
            "user.created",
            "users",
            &*subscriber,
            handler.clone(),
            stats,
        )
        .await
        .unwrap();
        assert_eq!(dispatcher.routing_key(), "user.created");

        let mut ackers = Vec::new();
        for (tag, body) in [(1, "ok"), (2, "fail"), (3, "ok")] {
            let (delivery, acker) = test_delivery("user.created", tag, body.as_bytes());
            subscriber.publish("user.created", delivery);
            ackers.push(acker);
        }
        subscriber.close("user.created");

        let (_tx, rx) = watch::channel(false);
        let err = dispatcher.run(rx).await.unwrap_err();

        assert!(matches!(
            err,
            WorkerError::SubscriptionClosed { ref routing_key } if routing_key == "user.created"
        ));
        assert_eq!(*handler.seen.lock(), vec![1, 2, 3]);
        assert_eq!(*outcomes.lock(), vec![true, false, true]);
        for acker in ackers {
            assert_eq!(acker.calls(), vec![AckCall::Ack { multiple: false }]);
        }
    }

    #[tokio::test]
    async fn test_cancel_takes_priority_over_queued_deliveries() {
        let subscriber = ChannelSubscriber::new();
        let handler = Arc::new(RecordingHandler::default());

        let mut stats = MockStats::new();
        stats.expect_start().never();
        stats.expect_track().never();

        let dispatcher = Dispatcher::subscribe(
            "user.created",
            "users",
            &*subscriber,
            handler.clone(),
            Arc::new(stats),
        )
        .await
        .unwrap();

        let (delivery, acker) = test_delivery("user.created", 1, b"ok");
        subscriber.publish("user.created", delivery);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = dispatcher.run(rx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
        assert!(handler.seen.lock().is_empty());
        assert!(acker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_idle_dispatcher_stops_on_cancel() {
        let subscriber = ChannelSubscriber::new();
        let (stats, outcomes) = recording_stats();
        let dispatcher = Dispatcher::subscribe(
            "user.status.changed",
            "users",
            &*subscriber,
            Arc::new(RecordingHandler::default()),
            stats,
        )
        .await
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(dispatcher.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("分发循环未及时退出")
            .unwrap();
        assert!(matches!(result, Err(WorkerError::Cancelled)));
        assert!(outcomes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stream_errors_are_skipped() {
        let subscriber = ChannelSubscriber::new();
        let handler = Arc::new(RecordingHandler::default());
        let (stats, outcomes) = recording_stats();
        let dispatcher = Dispatcher::subscribe(
            "user.created",
            "users",
            &*subscriber,
            handler.clone(),
            stats,
        )
        .await
        .unwrap();

        subscriber.publish_error("user.created", "frame error");
        let (delivery, _) = test_delivery("user.created", 7, b"ok");
        subscriber.publish("user.created", delivery);
        subscriber.close("user.created");

        let (_tx, rx) = watch::channel(false);
        assert!(dispatcher.run(rx).await.is_err());
        assert_eq!(*handler.seen.lock(), vec![7]);
        assert_eq!(*outcomes.lock(), vec![true]);
    }

    #[tokio::test]
    async fn test_subscribe_failure_returns_topology_error() {
        let subscriber = ChannelSubscriber::failing_on("user.created");
        let (stats, _) = recording_stats();

        let result = Dispatcher::subscribe(
            "user.created",
            "users",
            &*subscriber,
            Arc::new(RecordingHandler::default()),
            stats,
        )
        .await;

        assert!(matches!(result, Err(InfraError::Topology { .. })));
    }
}
