//! # 进程内 Broker
//!
//! 单分区主题、按消费组记录的已提交偏移与会话代次，可脚本化地触发再平衡、
//! 会话中断与加入失败。用于演示与测试，不做持久化。
//!
//! 同一消费组 Id 只应有一个 [`MemoryGroup`] 成员在消费，不做分区划分。

use crate::{
    config::{InitialOffset, SessionConfig},
    errors::{ConfigError, PublishError, SessionError},
    message::{Message, timestamp_from_millis},
    publisher::Publisher,
    subscriber::{Claims, ConsumerGroup, GroupSubscriber, Generations, Ticket},
};
use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const PARTITION: i32 = 0;

#[derive(Clone)]
struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
    timestamp_ms: i64,
}

#[derive(Default)]
struct BrokerState {
    logs: AHashMap<String, Vec<Record>>,
    committed: AHashMap<(String, String), (i64, String)>,
    join_failures: AHashMap<String, usize>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    appended: Notify,
}

impl BrokerInner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn produce(&self, topic: &str, key: &[u8], value: &[u8]) -> i64 {
        let timestamp_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let offset = {
            let mut state = self.lock();
            let log = state.logs.entry(topic.to_string()).or_default();
            log.push(Record {
                key: key.to_vec(),
                value: value.to_vec(),
                timestamp_ms,
            });
            log.len() as i64 - 1
        };
        self.appended.notify_waiters();
        offset
    }

    fn commit(&self, group: &str, topic: &str, next: i64, metadata: &str) {
        let mut state = self.lock();
        let entry = state
            .committed
            .entry((group.to_string(), topic.to_string()))
            .or_insert((0, String::new()));
        if next >= entry.0 {
            *entry = (next, metadata.to_string());
        }
    }
}

/// 进程内 Broker，克隆后共享同一份数据
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// 构造空 Broker
    pub fn new() -> Self {
        Self::default()
    }

    /// 以最早偏移为起点创建消费组成员
    pub fn group(&self, group_id: &str) -> MemoryGroup {
        self.group_with(group_id, InitialOffset::Oldest)
    }

    /// 创建消费组成员
    pub fn group_with(&self, group_id: &str, initial: InitialOffset) -> MemoryGroup {
        MemoryGroup {
            inner: Arc::clone(&self.inner),
            group_id: group_id.to_string(),
            initial,
            generations: Generations::default(),
            kick: Notify::new(),
            pending: Mutex::new(None),
            closed: AtomicBool::new(false),
            joins: AtomicU64::new(0),
        }
    }

    /// 创建基于本 Broker 的订阅者
    pub fn subscriber(
        &self,
        group_id: &str,
        config: SessionConfig,
    ) -> Result<GroupSubscriber<MemoryGroup>, ConfigError> {
        GroupSubscriber::new(group_id, self.group(group_id), config)
    }

    /// 创建发布者
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            inner: Arc::clone(&self.inner),
        }
    }

    /// 追加一条记录，返回其偏移
    pub fn produce(&self, topic: &str, key: &[u8], value: &[u8]) -> i64 {
        self.inner.produce(topic, key, value)
    }

    /// 主题的日志末端偏移
    pub fn end_offset(&self, topic: &str) -> i64 {
        self.inner
            .lock()
            .logs
            .get(topic)
            .map_or(0, |log| log.len() as i64)
    }

    /// 消费组在主题上的已提交偏移及元数据
    pub fn committed(&self, group_id: &str, topic: &str) -> Option<(i64, String)> {
        self.inner
            .lock()
            .committed
            .get(&(group_id.to_string(), topic.to_string()))
            .cloned()
    }

    /// 令消费组接下来的 `n` 次加入失败
    pub fn fail_joins(&self, group_id: &str, n: usize) {
        self.inner
            .lock()
            .join_failures
            .insert(group_id.to_string(), n);
    }
}

enum Kick {
    Rebalance,
    Interrupt(String),
}

/// 进程内消费组成员
pub struct MemoryGroup {
    inner: Arc<BrokerInner>,
    group_id: String,
    initial: InitialOffset,
    generations: Generations,
    kick: Notify,
    pending: Mutex<Option<Kick>>,
    closed: AtomicBool,
    joins: AtomicU64,
}

impl MemoryGroup {
    /// 消费组 Id
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 结束当前代次，会话正常返回后重新加入
    pub fn rebalance(&self) {
        self.push(Kick::Rebalance);
    }

    /// 以错误结束当前代次
    pub fn interrupt(&self, reason: &str) {
        self.push(Kick::Interrupt(reason.to_string()));
    }

    /// 当前代次
    pub fn generation(&self) -> u64 {
        self.generations.current()
    }

    /// 成功加入消费组的次数
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Acquire)
    }

    fn push(&self, kick: Kick) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(kick);
        self.kick.notify_one();
    }

    fn take_kick(&self) -> Option<Kick> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn join(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let mut state = self.inner.lock();
        if let Some(n) = state.join_failures.get_mut(&self.group_id) {
            if *n > 0 {
                *n -= 1;
                return Err(SessionError::Connect(format!(
                    "消费组'{}'无法加入",
                    self.group_id
                )));
            }
        }
        Ok(())
    }

    fn cursors(&self, topics: &[String]) -> Vec<(String, i64)> {
        let state = self.inner.lock();
        topics
            .iter()
            .map(|topic| {
                let start = match state
                    .committed
                    .get(&(self.group_id.clone(), topic.clone()))
                {
                    Some((offset, _)) => *offset,
                    None => match self.initial {
                        InitialOffset::Oldest => 0,
                        InitialOffset::Newest => {
                            state.logs.get(topic).map_or(0, |log| log.len() as i64)
                        }
                    },
                };
                (topic.clone(), start)
            })
            .collect()
    }

    fn fetch(&self, cursors: &[(String, i64)]) -> Vec<(usize, i64, Record)> {
        let state = self.inner.lock();
        let mut batch = Vec::new();
        for (i, (topic, next)) in cursors.iter().enumerate() {
            if let Some(log) = state.logs.get(topic) {
                for (offset, record) in log.iter().enumerate().skip(*next as usize) {
                    batch.push((i, offset as i64, record.clone()));
                }
            }
        }
        batch
    }

    async fn session(
        &self,
        topics: &[String],
        claims: &Claims,
        token: &CancellationToken,
        ticket: &Ticket,
    ) -> Result<(), SessionError> {
        let mut cursors = self.cursors(topics);
        claims.ready();

        loop {
            let appended = self.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if token.is_cancelled() {
                return Ok(());
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(SessionError::Closed);
            }
            match self.take_kick() {
                Some(Kick::Rebalance) => {
                    info!(group = %self.group_id, generation = ticket.generation(), "触发再平衡");
                    return Ok(());
                }
                Some(Kick::Interrupt(reason)) => return Err(SessionError::Interrupted(reason)),
                None => {}
            }

            let batch = self.fetch(&cursors);
            if batch.is_empty() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    _ = self.kick.notified() => {}
                    _ = appended => {}
                }
                continue;
            }

            for (i, offset, record) in batch {
                let topic = &cursors[i].0;
                let msg = Box::new(MemoryMessage {
                    inner: Arc::clone(&self.inner),
                    group_id: self.group_id.clone(),
                    topic: topic.clone(),
                    key: record.key,
                    value: record.value,
                    offset,
                    timestamp_ms: record.timestamp_ms,
                    ticket: ticket.clone(),
                });
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(()),
                    result = claims.deliver(msg) => result?,
                }
                cursors[i].1 = offset + 1;
            }
        }
    }
}

#[async_trait]
impl ConsumerGroup for MemoryGroup {
    #[instrument(name = "memory_consume", skip_all, fields(group = %self.group_id))]
    async fn consume(
        &self,
        topics: &[String],
        claims: &Claims,
        token: &CancellationToken,
    ) -> Result<(), SessionError> {
        self.join()?;
        let ticket = self.generations.advance();
        self.joins.fetch_add(1, Ordering::AcqRel);
        debug!(generation = ticket.generation(), ?topics, "分配分区");
        let result = self.session(topics, claims, token, &ticket).await;
        self.generations.expire();
        result
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Release);
        self.kick.notify_one();
        Ok(())
    }
}

struct MemoryMessage {
    inner: Arc<BrokerInner>,
    group_id: String,
    topic: String,
    key: Vec<u8>,
    value: Vec<u8>,
    offset: i64,
    timestamp_ms: i64,
    ticket: Ticket,
}

impl Message for MemoryMessage {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }

    fn partition(&self) -> i32 {
        PARTITION
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn timestamp(&self) -> Option<OffsetDateTime> {
        timestamp_from_millis(self.timestamp_ms)
    }

    fn done(&self, metadata: &str) {
        if !self.ticket.is_live() {
            debug!(
                topic = %self.topic,
                offset = self.offset,
                generation = self.ticket.generation(),
                "会话已结束，忽略完成标记"
            );
            return;
        }
        self.inner
            .commit(&self.group_id, &self.topic, self.offset + 1, metadata);
    }
}

/// 进程内发布者
#[derive(Clone)]
pub struct MemoryPublisher {
    inner: Arc<BrokerInner>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, value: &[u8], key: &[u8]) -> Result<(), PublishError> {
        if topic.is_empty() {
            warn!("主题为空，拒绝发送");
            return Err(PublishError::Send("主题为空".to_string()));
        }
        let offset = self.inner.produce(topic, key, value);
        debug!(topic, partition = PARTITION, offset, "消息已写入");
        Ok(())
    }
}
