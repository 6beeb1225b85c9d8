use demos::LogHandler;
use pubsub::{Dispatcher, Publisher, Subscriber};
use pubsub_kafka::{KafkaPublisher, config::KafkaConfig, subscriber};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() {
    fmt().with_target(false).init();

    let publisher = match KafkaPublisher::from_config() {
        Ok(p) => p,
        Err(e) => {
            error!("创建发布者失败：{e}");
            return;
        }
    };
    let cfg = match KafkaConfig::load() {
        Ok(cfg) => KafkaConfig {
            group: "kafka-test".to_string(),
            ..cfg
        },
        Err(e) => {
            error!("加载消费组配置失败：{e}");
            return;
        }
    };
    let sub = match subscriber(cfg) {
        Ok(sub) => Arc::new(sub),
        Err(e) => {
            error!("创建订阅者失败：{e}");
            return;
        }
    };
    let dispatcher = Dispatcher::new(Arc::clone(&sub));

    let handler = Arc::new(LogHandler::new(true));
    for topic in ["test-1", "test-2", "test-3"] {
        dispatcher.register(topic, handler.clone());
    }

    let token = CancellationToken::new();
    if let Err(e) = dispatcher.run(token.clone()).await {
        error!("启动消费失败：{e}");
        return;
    }

    for topic in ["test-1", "test-2", "test-3"] {
        if let Err(e) = publisher.publish(topic, b"hello", b"world").await {
            error!(topic, "发布消息失败：{e}");
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("监听退出信号失败：{e}");
    }
    info!("收到退出信号");
    token.cancel();
    dispatcher.all_done().await;
    if let Err(e) = sub.close().await {
        error!("关闭订阅者失败：{e}");
    }
}
