//! # **pubsub** 错误定义

use thiserror::Error;

/// 消费组会话错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// 无法建立会话，例如 Broker 不可达、消费组无效
    #[error("建立会话失败：{0}")]
    Connect(String),
    /// 会话中断，例如再平衡、分配被撤销、消费期间的瞬时错误
    #[error("会话中断：{0}")]
    Interrupted(String),
    /// 消费组已关闭
    #[error("消费组已关闭")]
    Closed,
}

/// 订阅者错误
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// 未注册任何主题
    #[error("未注册任何主题")]
    NoTopics,
    /// 订阅者已在运行
    #[error("订阅者已在运行")]
    AlreadyRunning,
    /// 订阅者已关闭
    #[error("订阅者已关闭")]
    Closed,
    /// 首个会话就绪前收到取消信号
    #[error("首个会话就绪前已取消")]
    Cancelled,
    /// 会话错误
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// 分发者错误
#[derive(Debug, Error)]
pub enum DispatchError {
    /// 分发循环已在运行
    #[error("分发循环已在运行")]
    AlreadyRunning,
    /// 启动订阅者失败
    #[error("启动订阅者失败：{0}")]
    Subscriber(#[from] SubscriberError),
}

/// 发布者错误
#[derive(Debug, Error)]
pub enum PublishError {
    /// 发送消息失败
    #[error("发送消息失败：{0}")]
    Send(String),
    /// 发布者已关闭
    #[error("发布者已关闭")]
    Closed,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 加载配置失败
    #[error("加载配置失败：{0}")]
    Load(#[from] config::ConfigError),
    /// 配置验证失败
    #[error("配置'{section}.{key}'验证失败：{message}")]
    ValidationError {
        /// 配置节
        section: String,
        /// 配置键
        key: String,
        /// 错误信息
        message: String,
    },
}

impl From<&str> for SessionError {
    fn from(s: &str) -> Self {
        SessionError::Interrupted(s.to_owned())
    }
}
