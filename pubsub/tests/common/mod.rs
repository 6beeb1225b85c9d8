#![allow(dead_code)]

use async_trait::async_trait;
use pubsub::{Handler, Message, config::SessionConfig};
use std::{
    future::Future,
    sync::{
        Arc, LazyLock, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::time::{Duration, Instant, sleep};
use tracing::{Level, info};
use tracing_subscriber::fmt;

pub static TRACING: LazyLock<()> = LazyLock::new(|| {
    fmt().with_test_writer().with_max_level(Level::DEBUG).init();
    info!("启用 {} 测试日志输出", Level::DEBUG);
});

pub fn session_config() -> SessionConfig {
    SessionConfig {
        buffer: 16,
        retry_backoff_ms: 10,
    }
}

/// 处理过程中的事件，以消息键标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(String),
    End(String),
}

impl Event {
    pub fn start(key: &str) -> Self {
        Self::Start(key.to_string())
    }

    pub fn end(key: &str) -> Self {
        Self::End(key.to_string())
    }
}

/// 可由多个处理者共享的事件时间线
pub type Timeline = Arc<Mutex<Vec<Event>>>;

pub fn timeline() -> Timeline {
    Arc::new(Mutex::new(Vec::new()))
}

/// 记录每次调用的处理者
pub struct Recorder {
    sync: bool,
    delay: Duration,
    ack: bool,
    entries: Mutex<Vec<(String, String)>>,
    events: Timeline,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Recorder {
    fn new(sync: bool) -> Self {
        Self {
            sync,
            delay: Duration::ZERO,
            ack: true,
            entries: Mutex::new(Vec::new()),
            events: timeline(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn sync() -> Self {
        Self::new(true)
    }

    pub fn concurrent() -> Self {
        Self::new(false)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn without_ack(mut self) -> Self {
        self.ack = false;
        self
    }

    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.events = timeline;
        self
    }

    /// 已处理消息的键值对
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn values(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn consume(&self, msg: &dyn Message) {
        let key = String::from_utf8_lossy(msg.key()).into_owned();
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event::Start(key.clone()));
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        if self.ack {
            msg.done("");
        }
        self.entries
            .lock()
            .unwrap()
            .push((key.clone(), String::from_utf8_lossy(msg.value()).into_owned()));
        self.events.lock().unwrap().push(Event::End(key));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_sync(&self) -> bool {
        self.sync
    }
}

/// 按键值对列表构造期望结果
pub fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// 处理时 panic 的处理者
pub struct Panicker;

#[async_trait]
impl Handler for Panicker {
    async fn consume(&self, msg: &dyn Message) {
        panic!("处理消息 {} 失败", msg.offset());
    }

    fn is_sync(&self) -> bool {
        true
    }
}

pub fn recorder(handler: Recorder) -> Arc<Recorder> {
    Arc::new(handler)
}

/// 轮询等待条件成立，超时返回 false
pub async fn wait_until<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// 限时等待异步操作完成
pub async fn within<F: Future>(limit: Duration, fut: F) -> F::Output {
    tokio::time::timeout(limit, fut)
        .await
        .expect("等待超时")
}
