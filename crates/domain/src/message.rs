use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, Timestamp, Username};

/// 消息类型标签。
///
/// 线上格式为字符串：`typing`、`newMessage`、`newImage`、`ping`。
/// 未知标签不会导致解码失败，而是保留在 `Other` 中交给消息中心处理。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Typing,
    NewMessage,
    NewImage,
    Ping,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Typing => "typing",
            MessageKind::NewMessage => "newMessage",
            MessageKind::NewImage => "newImage",
            MessageKind::Ping => "ping",
            MessageKind::Other(tag) => tag,
        }
    }

    /// 需要写入历史记录的内容消息
    pub fn is_content(&self) -> bool {
        matches!(self, MessageKind::NewMessage | MessageKind::NewImage)
    }

    /// 只转发、从不持久化的瞬时信号
    pub fn is_transient(&self) -> bool {
        matches!(self, MessageKind::Typing | MessageKind::Ping)
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "typing" => MessageKind::Typing,
            "newMessage" => MessageKind::NewMessage,
            "newImage" => MessageKind::NewImage,
            "ping" => MessageKind::Ping,
            _ => MessageKind::Other(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(value: MessageKind) -> Self {
        match value {
            MessageKind::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户之间交换的私信记录，构造后不可变。
///
/// 序列化字段名与客户端协议保持一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    id: MessageId,
    #[serde(rename = "sender_username")]
    sender: Username,
    #[serde(rename = "target_username")]
    target: Username,
    content: String,
    timestamp: Timestamp,
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    emoji: Option<String>,
}

impl DirectMessage {
    pub fn new(
        id: MessageId,
        sender: Username,
        target: Username,
        content: impl Into<String>,
        kind: MessageKind,
        emoji: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            sender,
            target,
            content: content.into(),
            timestamp,
            kind,
            emoji: emoji.filter(|value| !value.is_empty()),
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn sender(&self) -> &Username {
        &self.sender
    }

    pub fn target(&self) -> &Username {
        &self.target
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn emoji(&self) -> Option<&str> {
        self.emoji.as_deref()
    }

    /// 该消息是否涉及指定用户（发送方或接收方）
    pub fn involves(&self, username: &Username) -> bool {
        &self.sender == username || &self.target == username
    }
}

/// 客户端上行的消息载荷。
///
/// `sender_username` 与 `timestamp` 即使出现也会被忽略，
/// 由服务端根据认证身份和接收时间重新填写。
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub target_username: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub emoji: Option<String>,
}

impl InboundMessage {
    /// 从文本帧解码
    pub fn decode(frame: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(frame).map_err(|err| DomainError::malformed_message(err.to_string()))
    }

    /// 盖上发送者身份与服务端时间戳，生成最终的消息
    pub fn stamp(self, sender: Username, now: Timestamp) -> DomainResult<DirectMessage> {
        let target = Username::parse(self.target_username)?;
        let id = match self.id {
            Some(id) if !id.trim().is_empty() => MessageId::from(id),
            _ => MessageId::generate(),
        };

        Ok(DirectMessage::new(
            id,
            sender,
            target,
            self.content,
            self.kind,
            self.emoji,
            now,
        ))
    }
}
