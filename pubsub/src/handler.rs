//! # 消息处理者

use crate::message::Message;
use async_trait::async_trait;

/// 处理者特征
///
/// 由应用提供。`is_sync` 为真时，处理在分发循环上完成后才继续处理下一条消息，
/// 否则在独立任务中并发执行。处理完成后应调用 [`Message::done`] 标记进度，
/// 从未标记的消息将在下次会话中重新投递。
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// 处理一条消息
    async fn consume(&self, msg: &dyn Message);

    /// 是否同步处理
    fn is_sync(&self) -> bool;
}
