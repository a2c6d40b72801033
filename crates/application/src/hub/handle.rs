use domain::{DirectMessage, SessionId, Username};
use tokio::sync::{mpsc, oneshot};

use super::session::SessionHandle;
use crate::error::ApplicationError;

/// 提交给消息中心的事件
#[derive(Debug)]
pub enum HubEvent {
    Join {
        session: SessionHandle,
        /// 从持久化存储加载的历史，用于重启后补发
        seed: Vec<DirectMessage>,
    },
    Leave {
        username: Username,
        session_id: SessionId,
    },
    Dispatch(DirectMessage),
    Online(oneshot::Sender<Vec<Username>>),
}

/// 消息中心事件队列的发送端
///
/// 会话、REST 接口等所有外部调用方都只能通过它与消息中心交互。
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    pub(crate) fn new(sender: mpsc::Sender<HubEvent>) -> Self {
        Self { sender }
    }

    pub async fn join(
        &self,
        session: SessionHandle,
        seed: Vec<DirectMessage>,
    ) -> Result<(), ApplicationError> {
        self.submit(HubEvent::Join { session, seed }).await
    }

    pub async fn leave(
        &self,
        username: Username,
        session_id: SessionId,
    ) -> Result<(), ApplicationError> {
        self.submit(HubEvent::Leave {
            username,
            session_id,
        })
        .await
    }

    /// 提交一条消息。投递结果不会反馈给发送方
    pub async fn dispatch(&self, message: DirectMessage) -> Result<(), ApplicationError> {
        self.submit(HubEvent::Dispatch(message)).await
    }

    /// 当前在线的用户名，按字母序
    pub async fn online_users(&self) -> Result<Vec<Username>, ApplicationError> {
        let (reply, response) = oneshot::channel();
        self.submit(HubEvent::Online(reply)).await?;
        response.await.map_err(|_| ApplicationError::HubUnavailable)
    }

    async fn submit(&self, event: HubEvent) -> Result<(), ApplicationError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| ApplicationError::HubUnavailable)
    }
}
