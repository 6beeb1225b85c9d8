use crate::context::GroupContext;
use pubsub::{
    message::{Message, timestamp_from_millis},
    subscriber::Ticket,
};
use rdkafka::{
    Message as _, Offset, TopicPartitionList,
    consumer::{Consumer, StreamConsumer},
    error::KafkaResult,
    message::OwnedMessage,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Kafka 入站消息
pub(crate) struct KafkaMessage {
    inner: OwnedMessage,
    consumer: Arc<StreamConsumer<GroupContext>>,
    ticket: Option<Ticket>,
}

impl KafkaMessage {
    pub(crate) fn new(
        inner: OwnedMessage,
        consumer: Arc<StreamConsumer<GroupContext>>,
        ticket: Option<Ticket>,
    ) -> Self {
        Self {
            inner,
            consumer,
            ticket,
        }
    }

    fn store(&self, metadata: &str) -> KafkaResult<()> {
        let mut tpl = TopicPartitionList::new();
        let mut elem = tpl.add_partition(self.inner.topic(), self.inner.partition());
        elem.set_offset(Offset::Offset(self.inner.offset() + 1))?;
        if !metadata.is_empty() {
            elem.set_metadata(metadata);
        }
        self.consumer.store_offsets(&tpl)
    }
}

impl Message for KafkaMessage {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn key(&self) -> &[u8] {
        self.inner.key().unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.inner.payload().unwrap_or_default()
    }

    fn partition(&self) -> i32 {
        self.inner.partition()
    }

    fn offset(&self) -> i64 {
        self.inner.offset()
    }

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.inner
            .timestamp()
            .to_millis()
            .and_then(timestamp_from_millis)
    }

    fn done(&self, metadata: &str) {
        if !self.ticket.as_ref().is_some_and(|t| t.is_live()) {
            debug!(
                topic = self.topic(),
                partition = self.partition(),
                offset = self.offset(),
                "分区已撤销，忽略完成标记"
            );
            return;
        }
        if let Err(e) = self.store(metadata) {
            warn!(
                topic = self.topic(),
                partition = self.partition(),
                offset = self.offset(),
                "记录偏移失败：{e}"
            );
        }
    }
}
