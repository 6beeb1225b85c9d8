//! # **pubsub-kafka** 错误定义

use thiserror::Error;

/// 构造 Kafka 客户端错误
#[derive(Debug, Error)]
pub enum BuildError {
    /// 创建客户端失败
    #[error("Kafka错误：{0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    /// 加载配置失败
    #[error(transparent)]
    Config(#[from] pubsub::errors::ConfigError),
}
