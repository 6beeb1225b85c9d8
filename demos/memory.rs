use demos::LogHandler;
use pubsub::{Dispatcher, Publisher, Subscriber, config::SessionConfig, memory::MemoryBroker};
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() {
    fmt().with_target(false).init();

    let broker = MemoryBroker::new();
    let publisher = broker.publisher();
    let sub = match broker.subscriber("memory-test", SessionConfig::default()) {
        Ok(sub) => Arc::new(sub),
        Err(e) => {
            error!("创建订阅者失败：{e}");
            return;
        }
    };
    let dispatcher = Dispatcher::new(Arc::clone(&sub));
    dispatcher.register("orders", Arc::new(LogHandler::new(true)));
    dispatcher.register("emails", Arc::new(LogHandler::new(false)));
    sub.register_topic("audit");

    let token = CancellationToken::new();
    if let Err(e) = dispatcher.run(token.clone()).await {
        error!("启动消费失败：{e}");
        return;
    }

    for i in 0..3 {
        let value = format!("order-{i}");
        if let Err(e) = publisher.publish("orders", value.as_bytes(), b"").await {
            error!("发布消息失败：{e}");
        }
        let value = format!("email-{i}");
        if let Err(e) = publisher.publish("emails", value.as_bytes(), b"").await {
            error!("发布消息失败：{e}");
        }
    }
    if let Err(e) = publisher.publish("audit", b"nobody listens", b"").await {
        error!("发布消息失败：{e}");
    }

    sub.group().rebalance();
    sleep(Duration::from_millis(200)).await;
    token.cancel();
    dispatcher.all_done().await;

    info!(
        stats = ?dispatcher.stats(),
        orders = ?broker.committed("memory-test", "orders"),
        emails = ?broker.committed("memory-test", "emails"),
        "演示结束"
    );
}
