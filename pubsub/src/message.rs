//! # 订阅消息

use std::fmt;
use time::OffsetDateTime;

/// 订阅消息特征
///
/// 由订阅者为每条入站记录构造，交给恰好一次处理者调用。
pub trait Message: Send + Sync + 'static {
    /// 主题
    fn topic(&self) -> &str;
    /// 消息键，可能为空
    fn key(&self) -> &[u8];
    /// 消息体
    fn value(&self) -> &[u8];
    /// 分区
    fn partition(&self) -> i32;
    /// 偏移
    fn offset(&self) -> i64;
    /// 时间戳，源时间戳为零值时不存在
    fn timestamp(&self) -> Option<OffsetDateTime>;
    /// 标记消息处理完毕
    ///
    /// 仅对读出该消息的会话代次生效，会话已结束时不做任何事。
    fn done(&self, metadata: &str);
}

/// 装箱的订阅消息
pub type BoxMessage = Box<dyn Message>;

impl fmt::Debug for dyn Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic())
            .field("partition", &self.partition())
            .field("offset", &self.offset())
            .field("key_len", &self.key().len())
            .field("value_len", &self.value().len())
            .finish()
    }
}

/// 将毫秒时间戳转换为时间，零值与非法值视为不存在
pub fn timestamp_from_millis(millis: i64) -> Option<OffsetDateTime> {
    if millis == 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timestamp_is_absent() {
        assert!(timestamp_from_millis(0).is_none());
    }

    #[test]
    fn millis_to_datetime() {
        let ts = timestamp_from_millis(1_700_000_000_123).unwrap();
        assert_eq!(ts.unix_timestamp(), 1_700_000_000);
        assert_eq!(ts.millisecond(), 123);
    }
}
