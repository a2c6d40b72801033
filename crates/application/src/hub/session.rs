use domain::{DirectMessage, SessionId, Username};
use tokio::sync::mpsc::{self, error::TrySendError};

/// 消息中心写给会话的出站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// 实时投递的一条消息
    Deliver(DirectMessage),
    /// 加入时补发的历史，按时间正序
    Backlog(Vec<DirectMessage>),
}

/// 注册表中保存的会话句柄
///
/// 持有会话出站队列的唯一发送端。句柄被丢弃后，会话的写任务收到通道关闭，
/// 随即关闭底层连接。
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    username: Username,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl SessionHandle {
    pub fn new(id: SessionId, username: Username, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            username,
            outbound,
        }
    }

    /// 创建新会话句柄及其出站队列的接收端
    pub fn channel(username: Username, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(SessionId::new(), username, sender), receiver)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// 非阻塞入队。队列已满或已关闭都视为投递失败
    pub(crate) fn try_send(&self, frame: OutboundFrame) -> Result<(), TrySendError<OutboundFrame>> {
        self.outbound.try_send(frame)
    }
}
