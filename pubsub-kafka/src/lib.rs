//! # **pubsub** 的 Kafka 实现
//!
//! 以 librdkafka 实现 [`ConsumerGroup`](pubsub::subscriber::ConsumerGroup) 与
//! [`Publisher`](pubsub::Publisher)。

mod context;
mod message;

pub mod config;
pub mod errors;
pub mod group;
pub mod publisher;

pub use group::KafkaGroup;
pub use publisher::KafkaPublisher;

use crate::{config::KafkaConfig, errors::BuildError};
use pubsub::GroupSubscriber;

/// Kafka 订阅者
pub type KafkaSubscriber = GroupSubscriber<KafkaGroup>;

/// 以给定配置构造订阅者，首次运行时才连接 Broker
pub fn subscriber(config: KafkaConfig) -> Result<KafkaSubscriber, BuildError> {
    let group_id = config.group.clone();
    let session = config.session.clone();
    Ok(GroupSubscriber::new(group_id, KafkaGroup::new(config), session)?)
}

/// 从配置文件构造订阅者
pub fn subscriber_from_config() -> Result<KafkaSubscriber, BuildError> {
    subscriber(KafkaConfig::load()?)
}
