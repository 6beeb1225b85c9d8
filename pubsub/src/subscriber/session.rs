use crate::{errors::SessionError, message::BoxMessage};
use async_trait::async_trait;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// 消费组会话接口，由具体的 Broker 客户端实现
#[async_trait]
pub trait ConsumerGroup: Send + Sync + 'static {
    /// 加入消费组并消费，阻塞一个分配代次
    ///
    /// 分区分配完成后调用 [`Claims::ready`]，并经 [`Claims::deliver`] 转交每条记录。
    /// 代次因再平衡正常结束或 `token` 取消时返回 `Ok(())`。
    async fn consume(
        &self,
        topics: &[String],
        claims: &Claims,
        token: &CancellationToken,
    ) -> Result<(), SessionError>;

    /// 释放消费组资源
    async fn close(&self) -> Result<(), SessionError>;
}

/// 会话的消息出口
pub struct Claims {
    tx: mpsc::Sender<BoxMessage>,
    ready: Mutex<Option<oneshot::Sender<Result<(), SessionError>>>>,
}

impl Claims {
    pub(crate) fn new(
        tx: mpsc::Sender<BoxMessage>,
        ready: oneshot::Sender<Result<(), SessionError>>,
    ) -> Self {
        Self {
            tx,
            ready: Mutex::new(Some(ready)),
        }
    }

    fn take_ready(&self) -> Option<oneshot::Sender<Result<(), SessionError>>> {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// 标记会话就绪，仅首次调用生效
    pub fn ready(&self) {
        if let Some(tx) = self.take_ready() {
            let _ = tx.send(Ok(()));
        }
    }

    /// 首个会话是否尚未就绪
    pub fn is_pending(&self) -> bool {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 接收端是否已关闭
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 转交一条消息，接收端繁忙时等待
    pub async fn deliver(&self, msg: BoxMessage) -> Result<(), SessionError> {
        self.ready();
        self.tx.send(msg).await.map_err(|_| SessionError::Closed)
    }

    pub(crate) fn fail(&self, e: SessionError) {
        if let Some(tx) = self.take_ready() {
            let _ = tx.send(Err(e));
        }
    }
}

/// 会话代次计数
#[derive(Debug, Clone, Default)]
pub struct Generations(Arc<AtomicU64>);

impl Generations {
    /// 进入新代次并返回其凭据
    pub fn advance(&self) -> Ticket {
        let id = self.0.fetch_add(1, Ordering::AcqRel) + 1;
        Ticket {
            generations: self.clone(),
            id,
        }
    }

    /// 结束当前代次，已发放的凭据全部失效
    pub fn expire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// 当前代次
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// 会话代次凭据，消息完成标记仅在凭据有效时生效
#[derive(Debug, Clone)]
pub struct Ticket {
    generations: Generations,
    id: u64,
}

impl Ticket {
    /// 凭据所属代次
    pub fn generation(&self) -> u64 {
        self.id
    }

    /// 所属代次是否仍在进行
    pub fn is_live(&self) -> bool {
        self.generations.current() == self.id
    }
}
