#![allow(dead_code)]

use async_trait::async_trait;
use pubsub::{Handler, Message};
use pubsub_kafka::config::{KafkaConfig, ProducerConfig};
use std::sync::{LazyLock, Mutex};
use tokio::time::{Duration, Instant, sleep};
use tracing::{Level, info};
use tracing_subscriber::fmt;
use uuid::Uuid;

pub static TRACING: LazyLock<()> = LazyLock::new(|| {
    fmt().with_test_writer().with_max_level(Level::DEBUG).init();
    info!("启用 {} 测试日志输出", Level::DEBUG);
});

pub static CFG: LazyLock<KafkaConfig> = LazyLock::new(|| {
    LazyLock::force(&TRACING);
    KafkaConfig::load().unwrap()
});

pub static PRODUCER_CFG: LazyLock<ProducerConfig> =
    LazyLock::new(|| ProducerConfig::load().unwrap());

/// 使用独立消费组的配置
pub fn group_config() -> KafkaConfig {
    KafkaConfig {
        group: Uuid::new_v4().to_string(),
        ..CFG.clone()
    }
}

/// 记录消息值并标记完成的处理者
#[derive(Default)]
pub struct Collector {
    values: Mutex<Vec<String>>,
}

impl Collector {
    pub fn values(&self) -> Vec<String> {
        self.values.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for Collector {
    async fn consume(&self, msg: &dyn Message) {
        info!(topic = msg.topic(), partition = msg.partition(), offset = msg.offset(), "收到消息");
        msg.done("");
        self.values
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(msg.value()).into_owned());
    }

    fn is_sync(&self) -> bool {
        true
    }
}

pub async fn wait_until<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    cond()
}
