use application::{HubHandle, Identity, OutboundFrame, SessionHandle};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use domain::{DirectMessage, InboundMessage, Username};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 种子条数跟内存历史容量一致，超出存储查询上限时取上限
fn seed_limit(history_capacity: usize) -> u32 {
    u32::try_from(history_capacity).unwrap_or(u32::MAX)
}

/// WebSocket 连接管理器
///
/// 一个连接对应一个会话：
/// - 读任务解码客户端帧，盖上身份和时间后提交给消息中心
/// - 写任务消费会话出站队列，队列关闭时发送关闭帧
/// - 任一任务结束即向消息中心提交 Leave
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    identity: Identity,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, identity: Identity) -> Self {
        tracing::info!(
            user_id = %identity.user_id,
            username = %identity.username,
            "WebSocket 连接已建立"
        );

        Self {
            socket,
            state,
            identity,
        }
    }

    /// 运行连接主循环，直到任意一端断开
    pub async fn run(self) {
        let Self {
            socket,
            state,
            identity,
        } = self;
        let username = identity.username;

        // 从持久化存储加载最近的历史，失败时不带种子继续加入
        let seed = match state
            .messages
            .recent_for_user(username.clone(), seed_limit(state.hub_config.history_capacity))
            .await
        {
            Ok(seed) => seed,
            Err(err) => {
                tracing::warn!(username = %username, error = %err, "加载历史失败，跳过补发种子");
                Vec::new()
            }
        };

        let (session, outbound) =
            SessionHandle::channel(username.clone(), state.hub_config.outbound_queue_capacity);
        let session_id = session.id();

        if let Err(err) = state.hub.join(session, seed).await {
            tracing::error!(username = %username, error = %err, "会话注册失败");
            let _ = close(socket.split().0).await;
            return;
        }

        let (sender, incoming) = socket.split();

        let mut send_task = tokio::spawn(write_loop(sender, outbound));
        let mut recv_task = tokio::spawn(read_loop(
            incoming,
            state.clone(),
            username.clone(),
        ));

        // 等待任意一个任务完成（连接断开或会话被替换）
        tokio::select! {
            _ = &mut send_task => {
                tracing::info!(username = %username, "WebSocket发送任务完成");
                recv_task.abort();
            }
            _ = &mut recv_task => {
                tracing::info!(username = %username, "WebSocket接收任务完成");
                send_task.abort();
            }
        }

        // 被替换的会话提交的 Leave 不会影响新会话
        if let Err(err) = state.hub.leave(username.clone(), session_id).await {
            tracing::warn!(username = %username, error = %err, "提交离线事件失败");
        }

        tracing::info!(username = %username, session_id = %session_id, "WebSocket连接已断开");
    }
}

/// 写任务：把出站帧逐条写成文本帧
async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        let messages = match frame {
            OutboundFrame::Deliver(message) => vec![message],
            OutboundFrame::Backlog(messages) => messages,
        };

        for message in &messages {
            if send_message(&mut sender, message).await.is_err() {
                tracing::warn!("Failed to send text message");
                return;
            }
        }
    }

    // 消息中心丢弃了会话句柄
    if close(sender).await.is_err() {
        tracing::debug!("发送关闭帧失败");
    }
    tracing::info!("WebSocket发送任务结束");
}

/// 接收任务：解码客户端消息并提交给消息中心
async fn read_loop(mut incoming: SplitStream<WebSocket>, state: AppState, username: Username) {
    while let Some(frame) = incoming.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                tracing::info!(username = %username, error = %err, "WebSocket读取失败");
                break;
            }
        };

        let payload = match &message {
            WsMessage::Text(text) => text.as_str().as_bytes(),
            WsMessage::Binary(data) => data.as_ref(),
            WsMessage::Close(_) => {
                tracing::info!(username = %username, "WebSocket收到关闭消息");
                break;
            }
            // Pong 由底层自动回复
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        let direct = match InboundMessage::decode(payload)
            .and_then(|inbound| inbound.stamp(username.clone(), state.clock.now()))
        {
            Ok(direct) => direct,
            Err(err) => {
                tracing::warn!(username = %username, error = %err, "丢弃无法解析的消息");
                continue;
            }
        };

        if dispatch(&state.hub, direct).await.is_err() {
            break;
        }
    }
    tracing::info!("WebSocket接收任务结束");
}

async fn dispatch(hub: &HubHandle, message: DirectMessage) -> Result<(), ()> {
    hub.dispatch(message).await.map_err(|err| {
        tracing::error!(error = %err, "提交消息失败");
    })
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    message: &DirectMessage,
) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            return Ok(());
        }
    };
    sender.send(WsMessage::Text(payload.into())).await
}

async fn close(mut sender: SplitSink<WebSocket, WsMessage>) -> Result<(), axum::Error> {
    sender
        .send(WsMessage::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "session closed".into(),
        })))
        .await
}
