//! 连接退避重试
//!
//! Broker 往往晚于 worker 就绪（容器编排下尤为常见），启动阶段的连接失败按指数退避重试。
//! 是否值得重试由调用方判断，拓扑声明这类确定性失败应立即返回。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::InfraError;

/// 指数退避策略
///
/// 第 n 次重试前等待 `initial_delay * multiplier^n`，不超过 `max_delay`。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 首次执行之外最多再尝试的次数
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 依次产出每次重试前的等待时间，长度等于 `max_retries`
    pub fn backoff(&self) -> impl Iterator<Item = Duration> + '_ {
        let cap = self.max_delay.as_secs_f64();
        (0..self.max_retries).map(move |n| {
            let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(n as i32);
            Duration::from_secs_f64(secs.min(cap))
        })
    }
}

/// 按策略执行异步操作，直到成功、遇到不可重试错误或用尽重试次数
pub async fn retry_with_policy<T, Op, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: impl Fn(&InfraError) -> bool,
    mut op: Op,
) -> Result<T, InfraError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InfraError>>,
{
    let mut delays = policy.backoff();
    let mut attempt = 1u32;

    loop {
        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "重试成功");
                }
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => e,
        };

        let Some(delay) = delays.next() else {
            warn!(operation, attempts = attempt, error = %err, "重试次数已用尽");
            return Err(err);
        };

        warn!(
            operation,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "操作失败，稍后重试"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
