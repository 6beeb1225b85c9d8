//! # Kafka 发布者

use crate::{config::ProducerConfig, errors::BuildError};
use async_trait::async_trait;
use pubsub::{errors::PublishError, publisher::Publisher};
use rdkafka::producer::{FutureProducer, FutureRecord, future_producer::Delivery};
use tokio::time::Duration;
use tracing::{info, instrument};

/// Kafka 发布者
///
/// 缺省等待全部同步副本确认，失败时最多重试 5 次，单条消息超时 30 秒。
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    /// 构造函数
    pub fn new(config: &ProducerConfig) -> Result<Self, BuildError> {
        let producer: FutureProducer = config.client_config().create()?;
        info!(bootstrap = %config.bootstrap, acks = %config.acks, "成功创建生产者");
        Ok(Self {
            producer,
            timeout: config.timeout(),
        })
    }

    /// 从配置文件构造
    pub fn from_config() -> Result<Self, BuildError> {
        Self::new(&ProducerConfig::load()?)
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    #[instrument(name = "publish", skip(self, value, key))]
    async fn publish(&self, topic: &str, value: &[u8], key: &[u8]) -> Result<(), PublishError> {
        let record = FutureRecord::to(topic).payload(value).key(key);
        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| PublishError::Send(e.to_string()))
            .map(
                |Delivery {
                     partition,
                     offset,
                     timestamp: _,
                 }| {
                    info!("消息写入分区 {partition} 偏移 {offset}");
                },
            )
    }
}
