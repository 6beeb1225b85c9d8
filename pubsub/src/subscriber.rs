//! # 订阅者
//!
//! 订阅者持有消费组会话，经历再平衡后自动重新加入消费组，
//! 并以统一的消息序列对外提供消息。

mod group;
mod session;

pub use group::GroupSubscriber;
pub use session::{Claims, ConsumerGroup, Generations, Ticket};

use crate::{errors::SubscriberError, message::BoxMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 订阅者产生的消息序列，取消后关闭
pub type Messages = mpsc::Receiver<BoxMessage>;

/// 订阅者生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// 尚未运行
    Idle,
    /// 等待首个会话就绪
    Starting,
    /// 会话循环运行中
    Running,
    /// 已收到取消信号，正在退出会话循环
    Stopping,
    /// 已释放消费组资源
    Closed,
}

/// 订阅者特征
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// 注册主题，幂等
    ///
    /// 须在 `run` 之前完成；运行后注册的主题在下次再平衡后才生效。
    fn register_topic(&self, topic: &str);

    /// 建立消费组会话并返回消息序列
    ///
    /// 首个会话就绪（分区已分配）后才返回；首个会话无法建立时立即返回错误。
    /// 此后会话结束均视为可恢复，直到 `token` 取消为止。
    async fn run(&self, token: CancellationToken) -> Result<Messages, SubscriberError>;

    /// 释放消费组资源，不负责停止会话循环
    async fn close(&self) -> Result<(), SubscriberError>;
}
