use pubsub::subscriber::{Generations, Ticket};
use rdkafka::{
    ClientContext, TopicPartitionList,
    consumer::{BaseConsumer, ConsumerContext, Rebalance},
    error::{KafkaError, KafkaResult, RDKafkaErrorCode},
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 分配代次内发生的事件
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Assigned(usize),
    Revoked(usize),
    Failed(String),
}

/// 当前分配代次
#[derive(Debug, Clone, Default)]
pub(crate) struct Assignment {
    generations: Generations,
    ticket: Arc<Mutex<Option<Ticket>>>,
}

impl Assignment {
    pub(crate) fn ticket(&self) -> Option<Ticket> {
        self.ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn assign(&self) -> u64 {
        let ticket = self.generations.advance();
        let generation = ticket.generation();
        *self.ticket.lock().unwrap_or_else(PoisonError::into_inner) = Some(ticket);
        generation
    }

    fn revoke(&self) {
        self.generations.expire();
        self.ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// 消费者上下文，将再平衡回调转为会话事件
pub(crate) struct GroupContext {
    group: String,
    assignment: Assignment,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl GroupContext {
    pub(crate) fn new(
        group: &str,
        assignment: Assignment,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            group: group.to_string(),
            assignment,
            events,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!(group = %self.group, "会话事件接收端已关闭");
        }
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                self.assignment.revoke();
                info!(group = %self.group, partitions = tpl.count(), "分区即将撤销");
                self.emit(SessionEvent::Revoked(tpl.count()));
            }
            Rebalance::Error(e) => {
                warn!(group = %self.group, "再平衡错误：{e}");
                self.emit(SessionEvent::Failed(e.to_string()));
            }
            Rebalance::Assign(_) => {}
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            let generation = self.assignment.assign();
            info!(group = %self.group, generation, partitions = tpl.count(), "分区已分配");
            self.emit(SessionEvent::Assigned(tpl.count()));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(group = %self.group, partitions = offsets.count(), "偏移提交完成"),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!(group = %self.group, "偏移提交失败：{e}"),
        }
    }
}
