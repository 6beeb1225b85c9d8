use super::{Messages, Subscriber, SubscriberState, session::Claims, session::ConsumerGroup};
use crate::{
    config::{self, SessionConfig},
    errors::{ConfigError, SessionError, SubscriberError},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Duration, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Stopping,
}

struct StateCell(Mutex<SubscriberState>);

impl StateCell {
    fn get(&self) -> SubscriberState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: SubscriberState) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SubscriberState::Closed {
            *state = next;
        }
    }

    fn replace(&self, from: SubscriberState, to: SubscriberState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn close(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = SubscriberState::Closed;
    }
}

/// 基于消费组会话的订阅者
///
/// 与具体 Broker 客户端无关：会话的建立与消费委托给 [`ConsumerGroup`]，
/// 本结构负责主题集合、首个会话就绪等待与再平衡后的重新加入。
pub struct GroupSubscriber<G>
where
    G: ConsumerGroup,
{
    group_id: String,
    group: Arc<G>,
    topics: Arc<RwLock<Vec<String>>>,
    config: SessionConfig,
    state: Arc<StateCell>,
}

impl<G> GroupSubscriber<G>
where
    G: ConsumerGroup,
{
    /// 构造函数，会话配置未通过验证时返回错误
    pub fn new(
        group_id: impl Into<String>,
        group: G,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        config::validate("session", &config)?;
        let group_id = group_id.into();
        info!(group = %group_id, "初始化订阅者");
        Ok(Self {
            group_id,
            group: Arc::new(group),
            topics: Arc::new(RwLock::new(Vec::new())),
            config,
            state: Arc::new(StateCell(Mutex::new(SubscriberState::Idle))),
        })
    }

    /// 消费组 Id
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 底层消费组
    pub fn group(&self) -> &G {
        &self.group
    }

    /// 已注册的主题
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 生命周期状态
    pub fn state(&self) -> SubscriberState {
        self.state.get()
    }
}

#[async_trait]
impl<G> Subscriber for GroupSubscriber<G>
where
    G: ConsumerGroup,
{
    fn register_topic(&self, topic: &str) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if topics.iter().any(|t| t == topic) {
            return;
        }
        topics.push(topic.to_string());
        match self.state.get() {
            SubscriberState::Idle => debug!(group = %self.group_id, topic, "注册主题"),
            _ => info!(group = %self.group_id, topic, "运行中注册主题，下次再平衡后生效"),
        }
    }

    #[instrument(name = "run_subscriber", skip_all, fields(group = %self.group_id))]
    async fn run(&self, token: CancellationToken) -> Result<Messages, SubscriberError> {
        if !self
            .state
            .replace(SubscriberState::Idle, SubscriberState::Starting)
        {
            return match self.state.get() {
                SubscriberState::Closed => Err(SubscriberError::Closed),
                _ => Err(SubscriberError::AlreadyRunning),
            };
        }
        if self.topics().is_empty() {
            self.state.set(SubscriberState::Idle);
            return Err(SubscriberError::NoTopics);
        }

        let (tx, rx) = mpsc::channel(self.config.buffer);
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(session_loop(
            Arc::clone(&self.group),
            Arc::clone(&self.topics),
            Claims::new(tx, ready_tx),
            token,
            self.config.retry_backoff(),
            Arc::clone(&self.state),
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                self.state
                    .replace(SubscriberState::Starting, SubscriberState::Running);
                info!("首个会话就绪，开始投递消息");
                Ok(rx)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!("首个会话就绪前收到取消信号");
                Err(SubscriberError::Cancelled)
            }
        }
    }

    #[instrument(name = "close_subscriber", skip_all, fields(group = %self.group_id))]
    async fn close(&self) -> Result<(), SubscriberError> {
        self.state.close();
        self.group.close().await?;
        info!("释放消费组资源");
        Ok(())
    }
}

#[instrument(name = "session_loop", skip_all)]
async fn session_loop<G>(
    group: Arc<G>,
    topics: Arc<RwLock<Vec<String>>>,
    claims: Claims,
    token: CancellationToken,
    backoff: Duration,
    state: Arc<StateCell>,
) where
    G: ConsumerGroup,
{
    let mut generation: u64 = 0;
    let mut loop_state = LoopState::Running;

    while loop_state == LoopState::Running {
        let current = topics.read().unwrap_or_else(PoisonError::into_inner).clone();
        generation += 1;
        debug!(generation, ?current, "加入消费组");

        loop_state = match group.consume(&current, &claims, &token).await {
            Ok(()) if token.is_cancelled() => LoopState::Stopping,
            Ok(()) => {
                info!(generation, "会话结束，重新加入消费组");
                LoopState::Running
            }
            Err(e) if claims.is_pending() => {
                error!(generation, "建立首个会话失败：{e}");
                state.set(SubscriberState::Idle);
                claims.fail(e);
                return;
            }
            Err(SessionError::Closed) => {
                warn!(generation, "消费组或消息接收端已关闭，结束会话循环");
                LoopState::Stopping
            }
            Err(_) if token.is_cancelled() => LoopState::Stopping,
            Err(e) => {
                warn!(generation, "会话中断：{e}，{}ms 后重新加入消费组", backoff.as_millis());
                tokio::select! {
                    _ = token.cancelled() => LoopState::Stopping,
                    _ = sleep(backoff) => LoopState::Running,
                }
            }
        };
    }

    state.set(SubscriberState::Stopping);
    info!(generation, "会话循环退出，关闭消息序列");
    drop(claims);
    state.set(SubscriberState::Idle);
}
