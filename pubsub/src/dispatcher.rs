//! # 分发者
//!
//! 按主题将订阅者的消息路由到已注册的处理者。
//!
//! **注意**：未注册处理者的主题，其消息会被直接丢弃，既不标记完成，也不返回错误，
//! 仅计入 [`DispatchStats::dropped`] 并输出 `warn` 日志。运行后才注册的主题，
//! 在注册生效前到达的消息同样会被丢弃。请在 [`Dispatcher::run`] 之前完成全部注册。

use crate::{
    config::{self, DispatcherConfig},
    errors::{ConfigError, DispatchError},
    handler::Handler,
    message::Message,
    subscriber::{Messages, Subscriber},
};
use ahash::AHashMap;
use arc_swap::ArcSwap;
use futures::FutureExt;
use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

type HandlerMap = AHashMap<String, Arc<dyn Handler>>;

struct Registry {
    snapshot: ArcSwap<HandlerMap>,
    writer: Mutex<()>,
}

impl Registry {
    #[inline]
    fn get(&self, topic: &str) -> Option<Arc<dyn Handler>> {
        self.snapshot.load().get(topic).cloned()
    }
}

#[derive(Default)]
struct Counters {
    sync_handled: AtomicU64,
    async_spawned: AtomicU64,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

/// 分发统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// 同步处理完成的消息数
    pub sync_handled: u64,
    /// 已派发异步处理的消息数
    pub async_spawned: u64,
    /// 因主题未注册处理者而丢弃的消息数
    pub dropped: u64,
    /// 处理过程中发生 panic 的次数
    pub panicked: u64,
}

/// 分发者结构
pub struct Dispatcher<S>
where
    S: Subscriber,
{
    subscriber: Arc<S>,
    registry: Arc<Registry>,
    counters: Arc<Counters>,
    config: DispatcherConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> Dispatcher<S>
where
    S: Subscriber,
{
    /// 以缺省配置构造
    pub fn new(subscriber: Arc<S>) -> Self {
        Self::build(subscriber, DispatcherConfig::default())
    }

    /// 构造函数
    ///
    /// 配置未通过验证时返回错误，例如并发数为零。
    pub fn with_config(subscriber: Arc<S>, config: DispatcherConfig) -> Result<Self, ConfigError> {
        config::validate("dispatcher", &config)?;
        Ok(Self::build(subscriber, config))
    }

    fn build(subscriber: Arc<S>, config: DispatcherConfig) -> Self {
        Self {
            subscriber,
            registry: Arc::new(Registry {
                snapshot: ArcSwap::from_pointee(HandlerMap::new()),
                writer: Mutex::new(()),
            }),
            counters: Arc::new(Counters::default()),
            config,
            task: Mutex::new(None),
        }
    }

    /// 注册主题处理者
    ///
    /// 先将主题转交订阅者，再写入路由表；同一主题后注册者覆盖先注册者。
    /// 运行中注册时，生效前到达的该主题消息会被丢弃。
    pub fn register(&self, topic: &str, handler: Arc<dyn Handler>) {
        let _guard = self
            .registry
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.subscriber.register_topic(topic);
        let mut next = HandlerMap::clone(&self.registry.snapshot.load());
        let sync = handler.is_sync();
        match next.insert(topic.to_string(), handler) {
            Some(_) => info!(topic, sync, "覆盖主题处理者"),
            None => debug!(topic, sync, "注册主题处理者"),
        }
        self.registry.snapshot.store(Arc::new(next));
    }

    /// 启动订阅者并在后台运行分发循环
    ///
    /// 订阅者启动失败时立即返回错误且不做任何分发。分发循环在消息序列结束
    /// （即 `token` 取消、会话循环退出）后终止。
    #[instrument(name = "run_dispatcher", skip_all)]
    pub async fn run(&self, token: CancellationToken) -> Result<(), DispatchError> {
        if self.is_running() {
            return Err(DispatchError::AlreadyRunning);
        }
        let messages = self.subscriber.run(token).await?;
        let handle = tokio::spawn(dispatch(
            messages,
            Arc::clone(&self.registry),
            Arc::clone(&self.counters),
            Arc::new(Semaphore::new(self.config.concurrency)),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("启动分发循环");
        Ok(())
    }

    /// 分发循环是否在运行
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// 等待分发循环及其派发的异步处理全部结束
    pub async fn all_done(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("分发循环发生错误：{e}");
            }
        }
    }

    /// 统计快照
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sync_handled: self.counters.sync_handled.load(Ordering::Relaxed),
            async_spawned: self.counters.async_spawned.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// 订阅者
    pub fn subscriber(&self) -> &Arc<S> {
        &self.subscriber
    }
}

async fn dispatch(
    mut messages: Messages,
    registry: Arc<Registry>,
    counters: Arc<Counters>,
    permits: Arc<Semaphore>,
) {
    let mut tasks = JoinSet::new();

    while let Some(msg) = messages.recv().await {
        while let Some(result) = tasks.try_join_next() {
            report(result);
        }

        let Some(handler) = registry.get(msg.topic()) else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                topic = msg.topic(),
                partition = msg.partition(),
                offset = msg.offset(),
                "主题未注册处理者，丢弃消息"
            );
            continue;
        };

        if handler.is_sync() {
            if invoke(handler.as_ref(), msg.as_ref()).await {
                counters.sync_handled.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
            }
            continue;
        }

        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("获取异步处理许可失败：{e}");
                break;
            }
        };
        counters.async_spawned.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::clone(&counters);
        tasks.spawn(async move {
            if !invoke(handler.as_ref(), msg.as_ref()).await {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
            }
            drop(permit);
        });
    }

    info!("消息序列结束，等待 {} 个异步处理完成", tasks.len());
    while let Some(result) = tasks.join_next().await {
        report(result);
    }
    info!("分发循环退出");
}

async fn invoke(handler: &dyn Handler, msg: &dyn Message) -> bool {
    match AssertUnwindSafe(handler.consume(msg)).catch_unwind().await {
        Ok(()) => true,
        Err(_) => {
            error!(
                topic = msg.topic(),
                partition = msg.partition(),
                offset = msg.offset(),
                "处理者发生panic"
            );
            false
        }
    }
}

#[inline]
fn report(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!("异步处理任务发生错误：{e}");
    }
}
