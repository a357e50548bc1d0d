//! 订阅注册表
//!
//! 路由键、交换机与处理器的固定对应关系，以及按注册表批量建立订阅。

use std::sync::Arc;

use tracing::info;
use user_sync_shared::amqp::routes;
use user_sync_shared::error::InfraError;
use user_sync_shared::message::Subscriber;

use crate::dispatcher::Dispatcher;
use crate::handler::{Handler, UserCreated, UserEmailChanged, UserStatusChanged};
use crate::stats::Stats;
use crate::store::UserStore;
use crate::supervisor::Supervisor;

pub struct Registration {
    pub routing_key: &'static str,
    pub exchange: &'static str,
    pub handler: Arc<dyn Handler>,
}

/// 三种用户事件共用一个存储
pub fn registrations(store: Arc<dyn UserStore>) -> Vec<Registration> {
    vec![
        Registration {
            routing_key: routes::USER_CREATED,
            exchange: routes::USERS_EXCHANGE,
            handler: Arc::new(UserCreated::new(store.clone())),
        },
        Registration {
            routing_key: routes::USER_STATUS_CHANGED,
            exchange: routes::USERS_EXCHANGE,
            handler: Arc::new(UserStatusChanged::new(store.clone())),
        },
        Registration {
            routing_key: routes::USER_EMAIL_CHANGED,
            exchange: routes::USERS_EXCHANGE,
            handler: Arc::new(UserEmailChanged::new(store)),
        },
    ]
}

/// 为每条注册建立订阅并交给监督组运行
///
/// 任一订阅失败立即返回；已启动的 Dispatcher 随监督组一起被丢弃。
pub async fn subscribe_all<F>(
    supervisor: &mut Supervisor,
    subscriber: &dyn Subscriber,
    registrations: Vec<Registration>,
    stats_for: F,
) -> Result<(), InfraError>
where
    F: Fn(&str) -> Arc<dyn Stats>,
{
    for registration in registrations {
        let dispatcher = Dispatcher::subscribe(
            registration.routing_key,
            registration.exchange,
            subscriber,
            registration.handler,
            stats_for(registration.routing_key),
        )
        .await?;

        info!(
            routing_key = registration.routing_key,
            exchange = registration.exchange,
            "订阅已注册"
        );
        supervisor.spawn_dispatcher(dispatcher);
    }

    Ok(())
}
