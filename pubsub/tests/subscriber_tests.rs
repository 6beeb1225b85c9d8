mod common;

use common::*;
use pubsub::{
    Dispatcher, GroupSubscriber, Subscriber, SubscriberState,
    errors::{SessionError, SubscriberError},
    memory::{MemoryBroker, MemoryGroup},
};
use rstest::*;
use std::sync::{Arc, LazyLock};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(5);

#[fixture]
fn broker() -> MemoryBroker {
    LazyLock::force(&TRACING);
    MemoryBroker::new()
}

fn subscriber(broker: &MemoryBroker, group: &str, topics: &[&str]) -> GroupSubscriber<MemoryGroup> {
    let sub = broker.subscriber(group, session_config()).unwrap();
    for topic in topics {
        sub.register_topic(topic);
    }
    sub
}

#[rstest]
#[tokio::test]
async fn first_join_failure_fails_run(broker: MemoryBroker) {
    broker.fail_joins("g", 1);
    let sub = subscriber(&broker, "g", &["t"]);

    let result = sub.run(CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(SubscriberError::Session(SessionError::Connect(_)))
    ));
    assert_eq!(sub.state(), SubscriberState::Idle);

    let token = CancellationToken::new();
    let result = sub.run(token.clone()).await;
    assert!(result.is_ok());
    assert_eq!(sub.state(), SubscriberState::Running);
    token.cancel();
}

#[rstest]
#[tokio::test]
async fn run_without_topics(broker: MemoryBroker) {
    let sub = subscriber(&broker, "g", &[]);
    let result = sub.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(SubscriberError::NoTopics)));
    assert_eq!(sub.state(), SubscriberState::Idle);
}

#[rstest]
#[tokio::test]
async fn reject_concurrent_run(broker: MemoryBroker) {
    let sub = subscriber(&broker, "g", &["t"]);
    let token = CancellationToken::new();
    let _messages = sub.run(token.clone()).await.unwrap();

    let result = sub.run(token.clone()).await;
    assert!(matches!(result, Err(SubscriberError::AlreadyRunning)));
    token.cancel();
}

#[rstest]
#[tokio::test]
async fn run_after_close(broker: MemoryBroker) {
    let sub = subscriber(&broker, "g", &["t"]);
    sub.close().await.unwrap();
    assert_eq!(sub.state(), SubscriberState::Closed);

    let result = sub.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(SubscriberError::Closed)));
}

#[rstest]
#[tokio::test]
async fn cancel_ends_message_sequence(broker: MemoryBroker) {
    let sub = subscriber(&broker, "g", &["t"]);
    let token = CancellationToken::new();
    let mut messages = sub.run(token.clone()).await.unwrap();

    token.cancel();
    assert!(within(LIMIT, messages.recv()).await.is_none());
    assert!(wait_until(LIMIT, || sub.state() == SubscriberState::Idle).await);
}

#[rstest]
#[tokio::test]
async fn survive_rebalance(broker: MemoryBroker) {
    let sub = Arc::new(subscriber(&broker, "g", &[]));
    let dispatcher = Dispatcher::new(Arc::clone(&sub));
    let a = recorder(Recorder::sync());
    dispatcher.register("t", a.clone());
    for v in ["m0", "m1", "m2"] {
        broker.produce("t", b"", v.as_bytes());
    }

    let token = CancellationToken::new();
    dispatcher.run(token.clone()).await.unwrap();
    assert!(wait_until(LIMIT, || a.count() == 3).await);

    sub.group().rebalance();
    assert!(wait_until(LIMIT, || sub.group().joins() == 2).await);
    for v in ["m3", "m4", "m5"] {
        broker.produce("t", b"", v.as_bytes());
    }
    assert!(wait_until(LIMIT, || a.values().contains(&"m5".to_string())).await);
    token.cancel();
    within(LIMIT, dispatcher.all_done()).await;

    let mut values = a.values();
    values.dedup();
    assert_eq!(values, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
    assert_eq!(broker.committed("g", "t").map(|c| c.0), Some(6));
}

#[rstest]
#[tokio::test]
async fn rejoin_after_interrupt(broker: MemoryBroker) {
    let sub = subscriber(&broker, "g", &["t"]);
    let token = CancellationToken::new();
    let mut messages = sub.run(token.clone()).await.unwrap();

    sub.group().interrupt("网络抖动");
    assert!(wait_until(LIMIT, || sub.group().joins() == 2).await);
    assert_eq!(sub.state(), SubscriberState::Running);

    broker.produce("t", b"", b"after");
    let msg = within(LIMIT, messages.recv()).await.unwrap();
    assert_eq!(msg.value(), b"after");
    token.cancel();
}

#[rstest]
#[tokio::test]
async fn redeliver_unmarked_messages(broker: MemoryBroker) {
    for v in ["m0", "m1", "m2"] {
        broker.produce("t", b"", v.as_bytes());
    }

    let first = Arc::new(subscriber(&broker, "g", &[]));
    let dispatcher = Dispatcher::new(first);
    let lazy = recorder(Recorder::sync().without_ack());
    dispatcher.register("t", lazy.clone());
    let token = CancellationToken::new();
    dispatcher.run(token.clone()).await.unwrap();
    assert!(wait_until(LIMIT, || lazy.count() == 3).await);
    token.cancel();
    within(LIMIT, dispatcher.all_done()).await;
    assert_eq!(broker.committed("g", "t"), None);

    let second = Arc::new(subscriber(&broker, "g", &[]));
    let dispatcher = Dispatcher::new(second);
    let diligent = recorder(Recorder::sync());
    dispatcher.register("t", diligent.clone());
    let token = CancellationToken::new();
    dispatcher.run(token.clone()).await.unwrap();
    assert!(wait_until(LIMIT, || diligent.count() == 3).await);
    token.cancel();
    within(LIMIT, dispatcher.all_done()).await;

    assert_eq!(diligent.values(), vec!["m0", "m1", "m2"]);
    assert_eq!(broker.committed("g", "t").map(|c| c.0), Some(3));
}

#[rstest]
#[tokio::test]
async fn done_after_session_end_is_ignored(broker: MemoryBroker) {
    broker.produce("t", b"", b"m0");
    let sub = subscriber(&broker, "g", &["t"]);
    let token = CancellationToken::new();
    let mut messages = sub.run(token.clone()).await.unwrap();

    let stale = within(LIMIT, messages.recv()).await.unwrap();
    sub.group().rebalance();
    assert!(wait_until(LIMIT, || sub.group().joins() == 2).await);

    stale.done("stale");
    assert_eq!(broker.committed("g", "t"), None);

    let fresh = within(LIMIT, messages.recv()).await.unwrap();
    assert_eq!(fresh.offset(), stale.offset());
    fresh.done("fresh");
    assert_eq!(broker.committed("g", "t"), Some((1, "fresh".to_string())));
    token.cancel();
}

#[rstest]
#[tokio::test]
async fn late_topic_joins_next_generation(broker: MemoryBroker) {
    let sub = subscriber(&broker, "g", &["a"]);
    let token = CancellationToken::new();
    let mut messages = sub.run(token.clone()).await.unwrap();

    sub.register_topic("b");
    broker.produce("b", b"", b"late");
    sub.group().rebalance();

    let msg = within(LIMIT, messages.recv()).await.unwrap();
    assert_eq!(msg.topic(), "b");
    assert_eq!(msg.value(), b"late");
    token.cancel();
}
