use std::sync::Arc;

use domain::DirectMessage;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::repository::MessageRepository;

/// 历史写入任务
///
/// 按消息中心的处理顺序串行写入持久化存储，使事件循环不必等待数据库。
/// 队列有界，存储卡住时新消息被丢弃并记录日志，与写入失败的处理一致。
/// 发送端全部释放后，任务写完剩余消息再退出。
pub(crate) struct HistoryWriter {
    sender: mpsc::Sender<DirectMessage>,
}

impl HistoryWriter {
    pub(crate) fn spawn(
        store: Arc<dyn MessageRepository>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(store, receiver));
        (Self { sender }, task)
    }

    pub(crate) fn persist(&self, message: DirectMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                tracing::warn!(message_id = %message.id(), "持久化队列已满，消息未持久化");
            }
            Err(TrySendError::Closed(message)) => {
                tracing::error!(message_id = %message.id(), "历史写入任务已停止，消息未持久化");
            }
        }
    }
}

async fn run(store: Arc<dyn MessageRepository>, mut receiver: mpsc::Receiver<DirectMessage>) {
    while let Some(message) = receiver.recv().await {
        let message_id = message.id().clone();
        if let Err(err) = store.append(message).await {
            tracing::error!(error = %err, message_id = %message_id, "持久化消息失败");
        }
    }
    tracing::debug!("历史写入任务结束");
}
