//! # 消息发布者

use crate::errors::PublishError;
use async_trait::async_trait;

/// 发布者特征
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// 发送一条消息，直到 Broker 按配置的确认策略确认后返回
    async fn publish(&self, topic: &str, value: &[u8], key: &[u8]) -> Result<(), PublishError>;
}
