use application::{HistoryPage, HistoryQuery, MessageRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{DirectMessage, MessageId, MessageKind, RepositoryError, Username};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    message_id: String,
    sender_username: String,
    target_username: String,
    content: String,
    message_type: String,
    emoji: Option<String>,
    sent_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for DirectMessage {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let sender =
            Username::parse(value.sender_username).map_err(|err| invalid_data(err.to_string()))?;
        let target =
            Username::parse(value.target_username).map_err(|err| invalid_data(err.to_string()))?;

        Ok(DirectMessage::new(
            MessageId::from(value.message_id),
            sender,
            target,
            value.content,
            MessageKind::from(value.message_type),
            value.emoji,
            value.sent_at,
        ))
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, message: DirectMessage) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO direct_messages (message_id, sender_username, target_username, content, message_type, emoji, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id().as_str())
        .bind(message.sender().as_str())
        .bind(message.target().as_str())
        .bind(message.content())
        .bind(message.kind().as_str())
        .bind(message.emoji())
        .bind(message.timestamp())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn list_for_user(&self, query: HistoryQuery) -> Result<HistoryPage, RepositoryError> {
        // 多取一条用来判断是否还有更早的消息
        let fetch = i64::from(query.limit) + 1;

        let mut records = match &query.peer {
            Some(peer) => {
                sqlx::query_as::<_, MessageRecord>(
                    r#"SELECT message_id, sender_username, target_username, content, message_type, emoji, sent_at
                    FROM direct_messages
                    WHERE (sender_username = $1 AND target_username = $2)
                       OR (sender_username = $2 AND target_username = $1)
                    ORDER BY seq DESC
                    OFFSET $3
                    LIMIT $4"#,
                )
                .bind(query.username.as_str())
                .bind(peer.as_str())
                .bind(i64::from(query.offset))
                .bind(fetch)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?
            }
            None => {
                sqlx::query_as::<_, MessageRecord>(
                    r#"SELECT message_id, sender_username, target_username, content, message_type, emoji, sent_at
                    FROM direct_messages
                    WHERE sender_username = $1 OR target_username = $1
                    ORDER BY seq DESC
                    OFFSET $2
                    LIMIT $3"#,
                )
                .bind(query.username.as_str())
                .bind(i64::from(query.offset))
                .bind(fetch)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?
            }
        };

        let has_more = records.len() > query.limit as usize;
        records.truncate(query.limit as usize);
        // 页内按时间正序返回
        records.reverse();

        let messages = records
            .into_iter()
            .map(DirectMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryPage {
            messages,
            offset: query.offset,
            limit: query.limit,
            has_more,
        })
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    tracing::info!(max_connections, "创建数据库连接池");
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
