//! 后台任务监督
//!
//! 被监督的任务体出错时记录日志，随机退避后重试；收到取消信号时干净退出，
//! 不再重试。随机退避避免传输恢复时所有实例同时重连。

use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use config::RelayConfig;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 重试退避策略：在 `[min_backoff, max_backoff]` 内均匀随机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        if min_backoff <= max_backoff {
            Self {
                min_backoff,
                max_backoff,
            }
        } else {
            Self {
                min_backoff: max_backoff,
                max_backoff: min_backoff,
            }
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_min_ms),
            Duration::from_millis(config.retry_max_ms),
        )
    }

    /// 下一次退避时长
    pub fn next_delay(&self) -> Duration {
        let min = self.min_backoff.as_millis() as u64;
        let max = self.max_backoff.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(750), Duration::from_millis(1500))
    }
}

/// 反复执行 `op` 直到成功
///
/// 每次失败都会记录日志并随机退避。取消信号到达时返回 `None`。
pub async fn retry_on_failure<T, E, F, Fut>(
    name: &str,
    policy: RetryPolicy,
    token: &CancellationToken,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(task = name, "任务已取消");
                return None;
            }
            result = op() => result,
        };

        match result {
            Ok(value) => return Some(value),
            Err(err) => {
                let delay = policy.next_delay();
                warn!(
                    task = name,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "task failed, retrying after backoff"
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(task = name, "任务在退避期间被取消");
                        return None;
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

/// 被监督的后台任务
pub struct SupervisedTask {
    name: String,
    handle: JoinHandle<()>,
}

impl SupervisedTask {
    /// 启动任务；任务体返回 `Ok` 视为正常结束，返回 `Err` 则退避后重新执行
    pub fn spawn<F, Fut, E>(
        name: impl Into<String>,
        policy: RetryPolicy,
        token: CancellationToken,
        body: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            info!(task = %task_name, "后台任务启动");
            if retry_on_failure(&task_name, policy, &token, body)
                .await
                .is_some()
            {
                info!(task = %task_name, "后台任务正常结束");
            }
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待任务结束
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            error!(task = %self.name, error = %err, "后台任务异常退出");
        }
    }
}

/// 任务监督器：持有取消令牌和全部被监督任务，关闭时取消并等待它们结束
pub struct TaskSupervisor {
    token: CancellationToken,
    policy: RetryPolicy,
    tasks: Mutex<Vec<SupervisedTask>>,
}

impl TaskSupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            token: CancellationToken::new(),
            policy,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn spawn<F, Fut, E>(&self, name: impl Into<String>, body: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let task = SupervisedTask::spawn(name, self.policy, self.token.clone(), body);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取消全部任务并等待确认退出
    pub async fn shutdown(&self) {
        self.token.cancel();
        let tasks: Vec<SupervisedTask> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        info!(count = tasks.len(), "等待后台任务退出");
        futures::future::join_all(tasks.into_iter().map(SupervisedTask::join)).await;
        info!("后台任务已全部退出");
    }
}
