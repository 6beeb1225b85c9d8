//! 演示用的处理者

use async_trait::async_trait;
use pubsub::{Handler, Message};
use tracing::info;

/// 记录消息内容并标记完成的处理者
pub struct LogHandler {
    sync: bool,
}

impl LogHandler {
    /// 构造函数
    pub fn new(sync: bool) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl Handler for LogHandler {
    async fn consume(&self, msg: &dyn Message) {
        info!(
            topic = msg.topic(),
            partition = msg.partition(),
            offset = msg.offset(),
            key = %String::from_utf8_lossy(msg.key()),
            value = %String::from_utf8_lossy(msg.value()),
            "收到消息"
        );
        msg.done("");
    }

    fn is_sync(&self) -> bool {
        self.sync
    }
}
