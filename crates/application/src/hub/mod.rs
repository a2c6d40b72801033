//! 实时私信消息中心
//!
//! 单一事件循环独占在线注册表和内存历史：所有的加入、离开、消息投递
//! 都以事件形式提交，按到达顺序串行处理。事件循环从不等待网络写入，
//! 投递只是向会话的有界出站队列做一次非阻塞入队。

mod handle;
mod session;
mod writer;


use std::{collections::HashMap, sync::Arc};

use config::HubConfig;
use domain::{DirectMessage, SessionId, Username};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

pub use handle::{HubEvent, HubHandle};
pub use session::{OutboundFrame, SessionHandle};

use crate::history::HistoryBook;
use crate::repository::MessageRepository;
use writer::HistoryWriter;

pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    registry: HashMap<Username, SessionHandle>,
    history: HistoryBook,
    writer: HistoryWriter,
    writer_task: JoinHandle<()>,
}

impl Hub {
    /// 创建消息中心及其句柄，同时启动历史写入任务
    pub fn new(config: &HubConfig, store: Arc<dyn MessageRepository>) -> (Self, HubHandle) {
        let (sender, events) = mpsc::channel(config.event_queue_capacity.max(1));
        let (writer, writer_task) = HistoryWriter::spawn(store, config.persist_queue_capacity);

        let hub = Self {
            events,
            registry: HashMap::new(),
            history: HistoryBook::new(config.history_capacity),
            writer,
            writer_task,
        };
        (hub, HubHandle::new(sender))
    }

    /// 创建并在后台运行消息中心
    pub fn spawn(config: &HubConfig, store: Arc<dyn MessageRepository>) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config, store);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// 运行事件循环，直到所有句柄都被释放
    pub async fn run(mut self) {
        tracing::info!("消息中心已启动");

        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Join { session, seed } => self.join(session, seed),
                HubEvent::Leave {
                    username,
                    session_id,
                } => self.leave(&username, session_id),
                HubEvent::Dispatch(message) => self.dispatch(message),
                HubEvent::Online(reply) => {
                    let mut online: Vec<Username> = self.registry.keys().cloned().collect();
                    online.sort();
                    let _ = reply.send(online);
                }
            }
        }

        tracing::info!("消息中心事件通道已关闭，等待历史写入完成");
        let Hub {
            registry,
            writer,
            writer_task,
            ..
        } = self;
        drop(registry);
        drop(writer);
        if let Err(err) = writer_task.await {
            tracing::error!(error = %err, "历史写入任务异常退出");
        }
        tracing::info!("消息中心已停止");
    }

    fn join(&mut self, session: SessionHandle, seed: Vec<DirectMessage>) {
        let username = session.username().clone();

        if let Some(current) = self.registry.get(&username) {
            if current.id() == session.id() {
                tracing::debug!(username = %username, session_id = %session.id(), "重复加入，忽略");
                return;
            }
        }

        self.history.hydrate(&username, seed);

        // 后加入者生效：丢弃旧句柄即关闭旧连接
        if let Some(previous) = self.registry.remove(&username) {
            tracing::info!(
                username = %username,
                previous_session = %previous.id(),
                session_id = %session.id(),
                "同名用户重新连接，关闭旧连接"
            );
        }

        let backlog = self.history.replay(&username);
        let backlog_len = backlog.len();
        if !backlog.is_empty() {
            if let Err(err) = session.try_send(OutboundFrame::Backlog(backlog)) {
                tracing::warn!(
                    username = %username,
                    session_id = %session.id(),
                    reason = %send_failure(&err),
                    "补发历史失败，会话未注册"
                );
                return;
            }
        }

        tracing::info!(
            username = %username,
            session_id = %session.id(),
            backlog = backlog_len,
            online = self.registry.len() + 1,
            "用户已加入"
        );
        self.registry.insert(username, session);
    }

    fn leave(&mut self, username: &Username, session_id: SessionId) {
        match self.registry.get(username) {
            Some(current) if current.id() == session_id => {
                self.registry.remove(username);
                tracing::info!(
                    username = %username,
                    session_id = %session_id,
                    online = self.registry.len(),
                    "用户已离开"
                );
            }
            _ => {
                tracing::debug!(username = %username, session_id = %session_id, "过期的离开事件，忽略");
            }
        }
    }

    fn dispatch(&mut self, message: DirectMessage) {
        let kind = message.kind().clone();
        let target = message.target().clone();

        if kind.is_transient() {
            self.deliver(&target, OutboundFrame::Deliver(message));
        } else if kind.is_content() {
            tracing::debug!(
                message_id = %message.id(),
                sender = %message.sender(),
                target = %target,
                kind = %kind,
                "收到内容消息"
            );
            self.history.append(message.sender(), message.clone());
            self.history.append(&target, message.clone());
            self.writer.persist(message.clone());
            self.deliver(&target, OutboundFrame::Deliver(message));
        } else {
            tracing::warn!(
                message_id = %message.id(),
                sender = %message.sender(),
                kind = %kind,
                "未知消息类型，已丢弃"
            );
        }
    }

    /// 向在线用户投递。失败时注销该用户，不通知发送方
    fn deliver(&mut self, target: &Username, frame: OutboundFrame) {
        let Some(session) = self.registry.get(target) else {
            return;
        };

        if let Err(err) = session.try_send(frame) {
            let session_id = session.id();
            self.registry.remove(target);
            tracing::warn!(
                username = %target,
                session_id = %session_id,
                reason = %send_failure(&err),
                online = self.registry.len(),
                "投递失败，注销目标会话"
            );
        }
    }
}

fn send_failure(err: &TrySendError<OutboundFrame>) -> &'static str {
    match err {
        TrySendError::Full(_) => "outbound queue full",
        TrySendError::Closed(_) => "connection closed",
    }
}
