//! # Kafka 消费组
//!
//! 首次消费时创建消费者并检查 Broker 连通性，此后消费者跨代次复用，
//! 仅在主题集合变化时重新订阅。分区撤销即结束当前代次。

use crate::{
    config::KafkaConfig,
    context::{Assignment, GroupContext, SessionEvent},
    message::KafkaMessage,
};
use async_trait::async_trait;
use pubsub::{
    errors::SessionError,
    subscriber::{Claims, ConsumerGroup},
};
use rdkafka::consumer::{Consumer, StreamConsumer};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

struct Session {
    consumer: Arc<StreamConsumer<GroupContext>>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    topics: Vec<String>,
}

/// Kafka 消费组成员
pub struct KafkaGroup {
    config: KafkaConfig,
    assignment: Assignment,
    session: Mutex<Option<Session>>,
    closed: CancellationToken,
}

impl KafkaGroup {
    /// 构造函数，不建立连接
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            assignment: Assignment::default(),
            session: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// 消费组配置
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    #[instrument(name = "connect_group", skip_all, fields(group = %self.config.group))]
    async fn connect(&self) -> Result<Session, SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = GroupContext::new(&self.config.group, self.assignment.clone(), tx);
        let consumer: Arc<StreamConsumer<GroupContext>> = Arc::new(
            self.config
                .client_config()
                .create_with_context(context)
                .map_err(|e| SessionError::Connect(e.to_string()))?,
        );

        let probe = Arc::clone(&consumer);
        let timeout = self.config.metadata_timeout();
        let brokers = tokio::task::spawn_blocking(move || {
            probe
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| SessionError::Connect(e.to_string()))?
        .map_err(|e| SessionError::Connect(e.to_string()))?;
        info!(bootstrap = %self.config.bootstrap, brokers, "成功连接Kafka集群");

        Ok(Session {
            consumer,
            events: rx,
            topics: Vec::new(),
        })
    }

    fn subscribe(session: &mut Session, topics: &[String]) -> Result<(), SessionError> {
        if session.topics == topics {
            return Ok(());
        }
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        session
            .consumer
            .subscribe(&refs)
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        info!(?topics, "订阅主题");
        session.topics = topics.to_vec();
        Ok(())
    }
}

#[async_trait]
impl ConsumerGroup for KafkaGroup {
    #[instrument(name = "kafka_consume", skip_all, fields(group = %self.config.group))]
    async fn consume(
        &self,
        topics: &[String],
        claims: &Claims,
        token: &CancellationToken,
    ) -> Result<(), SessionError> {
        let mut guard = self.session.lock().await;
        if self.closed.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let session = match guard.take() {
            Some(session) => guard.insert(session),
            None => guard.insert(self.connect().await?),
        };
        Self::subscribe(session, topics)?;
        if self.assignment.ticket().is_some() {
            claims.ready();
        }

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                _ = self.closed.cancelled() => return Err(SessionError::Closed),
                event = session.events.recv() => match event {
                    Some(SessionEvent::Assigned(partitions)) => {
                        debug!(partitions, "开始消费已分配分区");
                        claims.ready();
                    }
                    Some(SessionEvent::Revoked(partitions)) => {
                        debug!(partitions, "代次结束");
                        return Ok(());
                    }
                    Some(SessionEvent::Failed(e)) => return Err(SessionError::Interrupted(e)),
                    None => return Err(SessionError::Closed),
                },
                result = session.consumer.recv() => match result {
                    Ok(msg) => {
                        let msg = KafkaMessage::new(
                            msg.detach(),
                            Arc::clone(&session.consumer),
                            self.assignment.ticket(),
                        );
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => return Ok(()),
                            result = claims.deliver(Box::new(msg)) => result?,
                        }
                    }
                    Err(e) => {
                        warn!("接收消息失败：{e}");
                        return Err(SessionError::Interrupted(e.to_string()));
                    }
                },
            }
        }
    }

    #[instrument(name = "close_group", skip_all, fields(group = %self.config.group))]
    async fn close(&self) -> Result<(), SessionError> {
        self.closed.cancel();
        if let Some(session) = self.session.lock().await.take() {
            session.consumer.unsubscribe();
            info!(topics = ?session.topics, "退出消费组");
        }
        Ok(())
    }
}
