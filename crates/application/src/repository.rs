use async_trait::async_trait;
use domain::{DirectMessage, RepositoryError, Username};
use serde::Serialize;

/// 历史消息分页查询
///
/// 分页从最新的消息往回数：`offset = 0` 表示最近的一页。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub username: Username,
    /// 只看与该用户之间的对话
    pub peer: Option<Username>,
    pub offset: u32,
    pub limit: u32,
}

impl HistoryQuery {
    pub fn recent(username: Username, limit: u32) -> Self {
        Self {
            username,
            peer: None,
            offset: 0,
            limit,
        }
    }

    /// 判断消息是否属于查询范围
    pub fn matches(&self, message: &DirectMessage) -> bool {
        match &self.peer {
            Some(peer) => {
                (message.sender() == &self.username && message.target() == peer)
                    || (message.sender() == peer && message.target() == &self.username)
            }
            None => message.involves(&self.username),
        }
    }
}

/// 一页历史消息，页内按时间正序排列
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub messages: Vec<DirectMessage>,
    pub offset: u32,
    pub limit: u32,
    pub has_more: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 追加一条内容消息，发送方和接收方的历史都通过查询条件覆盖
    async fn append(&self, message: DirectMessage) -> Result<(), RepositoryError>;

    // 按 offset/limit 分页查询用户历史
    async fn list_for_user(&self, query: HistoryQuery) -> Result<HistoryPage, RepositoryError>;

    // 最近的若干条消息，按时间正序返回（用于重连时补发）
    async fn recent_for_user(
        &self,
        username: Username,
        limit: u32,
    ) -> Result<Vec<DirectMessage>, RepositoryError> {
        let page = self
            .list_for_user(HistoryQuery::recent(username, limit))
            .await?;
        Ok(page.messages)
    }
}

pub mod memory {
    use super::*;
    use tokio::sync::RwLock;

    /// 进程内消息存储，用于开发环境和测试
    #[derive(Default)]
    pub struct InMemoryMessageRepository {
        messages: RwLock<Vec<DirectMessage>>,
    }

    impl InMemoryMessageRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn len(&self) -> usize {
            self.messages.read().await.len()
        }
    }

    #[async_trait]
    impl MessageRepository for InMemoryMessageRepository {
        async fn append(&self, message: DirectMessage) -> Result<(), RepositoryError> {
            self.messages.write().await.push(message);
            Ok(())
        }

        async fn list_for_user(&self, query: HistoryQuery) -> Result<HistoryPage, RepositoryError> {
            let messages = self.messages.read().await;
            let matching: Vec<&DirectMessage> =
                messages.iter().filter(|message| query.matches(message)).collect();

            let end = matching.len().saturating_sub(query.offset as usize);
            let start = end.saturating_sub(query.limit as usize);

            Ok(HistoryPage {
                messages: matching[start..end].iter().map(|m| (*m).clone()).collect(),
                offset: query.offset,
                limit: query.limit,
                has_more: start > 0,
            })
        }
    }
}
