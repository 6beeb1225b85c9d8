//! # Kafka 配置
//!
//! 配置从 `config/default.toml` 分层加载，`PUBSUB__KAFKA__GROUP` 之类的环境变量覆盖文件设置。
//! `consumer` 与 `producer` 映射原样写入 librdkafka 客户端配置，优先级最高。

use pubsub::{
    config::{InitialOffset, SessionConfig, build_config, load_section},
    errors::ConfigError,
};
use rdkafka::ClientConfig;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};
use tokio::time::Duration;
use validator::Validate;

fn load<T>(section: &str) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Validate + Default,
{
    let config = build_config(PathBuf::from(env!("CARGO_MANIFEST_DIR")))?;
    load_section(&config, section)
}

/// 消费组配置
#[derive(Debug, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct KafkaConfig {
    /// Broker 地址列表
    #[validate(length(min = 1))]
    pub bootstrap: String,
    /// 消费组 Id
    #[validate(length(min = 1))]
    pub group: String,
    /// 无已提交偏移时的起始位置
    pub initial: InitialOffset,
    /// 会话超时，单位毫秒
    #[validate(range(min = 1))]
    pub session_timeout_ms: u64,
    /// 心跳间隔，单位毫秒
    #[validate(range(min = 1))]
    pub heartbeat_ms: u64,
    /// 自动提交间隔，单位毫秒
    #[validate(range(min = 1))]
    pub commit_interval_ms: u64,
    /// 连接检查时获取元数据的超时，单位毫秒
    #[validate(range(min = 1))]
    pub metadata_timeout_ms: u64,
    /// 会话循环配置
    #[validate(nested)]
    pub session: SessionConfig,
    /// librdkafka 消费者配置覆盖项
    pub consumer: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap: "localhost:9092".to_string(),
            group: "pubsub-group".to_string(),
            initial: InitialOffset::Oldest,
            session_timeout_ms: 30_000,
            heartbeat_ms: 3_000,
            commit_interval_ms: 1_000,
            metadata_timeout_ms: 10_000,
            session: SessionConfig::default(),
            consumer: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    /// 从 `kafka` 配置节加载
    pub fn load() -> Result<Self, ConfigError> {
        load("kafka")
    }

    /// 连接检查超时
    #[inline]
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    /// 生成消费者客户端配置
    ///
    /// 偏移仅在处理者标记完成后写入本地存储，由后台按间隔自动提交。
    pub fn client_config(&self) -> ClientConfig {
        let reset = match self.initial {
            InitialOffset::Oldest => "earliest",
            InitialOffset::Newest => "latest",
        };
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap)
            .set("group.id", &self.group)
            .set("auto.offset.reset", reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", self.heartbeat_ms.to_string())
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", self.commit_interval_ms.to_string())
            .set("enable.auto.offset.store", "false");
        for (key, value) in &self.consumer {
            config.set(key, value);
        }
        config
    }
}

/// 生产者配置
#[derive(Debug, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct ProducerConfig {
    /// Broker 地址列表
    #[validate(length(min = 1))]
    pub bootstrap: String,
    /// 确认策略
    #[validate(length(min = 1))]
    pub acks: String,
    /// 发送失败时的最大重试次数
    pub retries: u32,
    /// 单条消息的发送超时，单位毫秒
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    /// librdkafka 生产者配置覆盖项
    pub producer: HashMap<String, String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            bootstrap: "localhost:9092".to_string(),
            acks: "all".to_string(),
            retries: 5,
            timeout_ms: 30_000,
            producer: HashMap::new(),
        }
    }
}

impl ProducerConfig {
    /// 从 `producer` 配置节加载
    pub fn load() -> Result<Self, ConfigError> {
        load("producer")
    }

    /// 发送超时
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 生成生产者客户端配置
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap)
            .set("acks", &self.acks)
            .set("message.send.max.retries", self.retries.to_string())
            .set("message.timeout.ms", self.timeout_ms.to_string());
        for (key, value) in &self.producer {
            config.set(key, value);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Config;

    #[test]
    fn load_from_default_file() {
        let cfg = KafkaConfig::load().unwrap();
        assert_eq!(cfg.group, "pubsub-group");
        assert_eq!(cfg.initial, InitialOffset::Oldest);
        assert_eq!(cfg.session.buffer, 16);
        assert_eq!(
            cfg.consumer.get("client.id").map(String::as_str),
            Some("pubsub-consumer")
        );

        let cfg = ProducerConfig::load().unwrap();
        assert_eq!(cfg.acks, "all");
        assert_eq!(cfg.retries, 5);
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn consumer_settings() {
        let mut cfg = KafkaConfig {
            initial: InitialOffset::Newest,
            ..Default::default()
        };
        cfg.consumer
            .insert("session.timeout.ms".to_string(), "45000".to_string());
        let client = cfg.client_config();
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client.get("session.timeout.ms"), Some("45000"));
    }

    #[test]
    fn producer_settings() {
        let client = ProducerConfig::default().client_config();
        assert_eq!(client.get("acks"), Some("all"));
        assert_eq!(client.get("message.send.max.retries"), Some("5"));
        assert_eq!(client.get("message.timeout.ms"), Some("30000"));
    }

    #[test]
    fn reject_empty_group() {
        let config = Config::builder()
            .set_override("kafka.group", "")
            .unwrap()
            .build()
            .unwrap();
        let result = load_section::<KafkaConfig>(&config, "kafka");
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError { key, .. }) if key == "group"
        ));
    }

    #[test]
    fn reject_zero_buffer() {
        let config = Config::builder()
            .set_override("kafka.session.buffer", 0)
            .unwrap()
            .build()
            .unwrap();
        let result = load_section::<KafkaConfig>(&config, "kafka");
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
