//! # **pubsub** 核心库
//!
//! 以消费组方式订阅若干主题，并按主题将消息路由到应用注册的处理者。
//! 同步处理者按到达顺序逐条处理，异步处理者在有界并发下独立执行；
//! 会话在再平衡后自动重新建立，消息至少投递一次。

#![warn(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod subscriber;

pub use dispatcher::{DispatchStats, Dispatcher};
pub use handler::Handler;
pub use message::{BoxMessage, Message};
pub use publisher::Publisher;
pub use subscriber::{GroupSubscriber, Messages, Subscriber, SubscriberState};
