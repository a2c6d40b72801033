use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use validator::Validate;

use application::{ApplicationError, HistoryPage, HistoryQuery};
use domain::{DirectMessage, InboundMessage, MessageKind, Username};

use crate::{
    auth::authenticate_headers, error::ApiError, state::AppState,
    ws_connection::WebSocketConnection,
};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    /// 只看与该用户之间的对话
    user: Option<String>,
    offset: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessagePayload {
    id: Option<String>,
    #[validate(length(min = 1, max = 50))]
    target_username: String,
    #[serde(default)]
    content: String,
    #[serde(rename = "type")]
    kind: MessageKind,
    emoji: Option<String>,
}

#[derive(Debug, Serialize)]
struct OnlineUsers {
    users: Vec<Username>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/messages", get(get_history).post(send_message))
        .route("/online", get(online_users))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 认证通过后才升级连接，失败直接返回 401
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let identity = match query.token.as_deref().filter(|token| !token.is_empty()) {
        Some(token) => state.authenticator.authenticate(token)?,
        None => authenticate_headers(state.authenticator.as_ref(), &headers)?,
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state, identity).run()))
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, ApiError> {
    let identity = authenticate_headers(state.authenticator.as_ref(), &headers)?;

    let peer = params
        .user
        .filter(|user| !user.trim().is_empty())
        .map(Username::parse)
        .transpose()
        .map_err(ApplicationError::from)?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let page = state
        .messages
        .list_for_user(HistoryQuery {
            username: identity.username,
            peer,
            offset: params.offset.unwrap_or(0),
            limit,
        })
        .await
        .map_err(ApplicationError::from)?;

    Ok(Json(page))
}

/// 无长连接的客户端通过该接口发送消息，与会话走同一条提交路径
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<DirectMessage>), ApiError> {
    let identity = authenticate_headers(state.authenticator.as_ref(), &headers)?;
    payload.validate()?;

    let message = InboundMessage {
        id: payload.id,
        target_username: payload.target_username,
        content: payload.content,
        kind: payload.kind,
        emoji: payload.emoji,
    }
    .stamp(identity.username, state.clock.now())
    .map_err(ApplicationError::from)?;

    state.hub.dispatch(message.clone()).await?;

    Ok((StatusCode::ACCEPTED, Json(message)))
}

async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OnlineUsers>, ApiError> {
    authenticate_headers(state.authenticator.as_ref(), &headers)?;
    let users = state.hub.online_users().await?;
    Ok(Json(OnlineUsers { users }))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use application::{FixedClock, Hub, InMemoryMessageRepository, MessageRepository};
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Method, Request},
    };
    use chrono::{TimeZone, Utc};
    use config::{HubConfig, JwtConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::JwtService;

    struct Harness {
        app: Router,
        jwt: JwtService,
        store: Arc<InMemoryMessageRepository>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryMessageRepository::new());
            let config = HubConfig::default();
            let (hub, _task) = Hub::spawn(&config, store.clone());
            let jwt = JwtService::new(JwtConfig {
                secret: "routes-test-secret-key-with-enough-length".to_string(),
                expiration_hours: 1,
            });
            let state = AppState::new(
                hub,
                store.clone(),
                Arc::new(jwt.clone()),
                Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())),
                config,
            );

            Self {
                app: router(state),
                jwt,
                store,
            }
        }

        fn bearer(&self, username: &str) -> String {
            let token = self
                .jwt
                .generate_token(Uuid::new_v4(), &Username::parse(username).unwrap())
                .unwrap();
            format!("Bearer {token}")
        }

        async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }

        async fn get(&self, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(Method::GET).uri(uri);
            if let Some(user) = user {
                builder = builder.header(AUTHORIZATION, self.bearer(user));
            }
            self.call(builder.body(Body::empty()).unwrap()).await
        }

        async fn post(&self, uri: &str, user: &str, body: Value) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(AUTHORIZATION, self.bearer(user))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.call(request).await
        }

        async fn wait_for_stored(&self, count: usize) {
            for _ in 0..50 {
                if self.store.len().await >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("store never reached {count} messages");
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let harness = Harness::new();
        let (status, _) = harness.get("/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn websocket_without_token_is_rejected_before_upgrade() {
        let harness = Harness::new();
        let (status, body) = harness.get("/api/v1/ws", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, body) = harness.get("/api/v1/ws?token=garbage", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "AUTHENTICATION_FAILED");
    }

    #[tokio::test]
    async fn history_requires_bearer_token() {
        let harness = Harness::new();
        let (status, _) = harness.get("/api/v1/messages", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn posted_message_is_stamped_and_stored() {
        let harness = Harness::new();

        let (status, body) = harness
            .post(
                "/api/v1/messages",
                "alice",
                json!({
                    "target_username": "bob",
                    "content": "hi",
                    "type": "newMessage",
                    "sender_username": "mallory"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["sender_username"], "alice");
        assert_eq!(body["target_username"], "bob");
        assert_eq!(body["timestamp"], "2024-05-01T12:00:00Z");
        assert!(!body["id"].as_str().unwrap().is_empty());

        harness.wait_for_stored(1).await;

        let (status, page) = harness.get("/api/v1/messages?user=alice", Some("bob")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["messages"].as_array().unwrap().len(), 1);
        assert_eq!(page["messages"][0]["content"], "hi");
        assert_eq!(page["limit"], 20);
        assert_eq!(page["has_more"], false);
    }

    #[tokio::test]
    async fn typing_is_accepted_but_never_stored() {
        let harness = Harness::new();

        let (status, _) = harness
            .post(
                "/api/v1/messages",
                "alice",
                json!({"target_username": "bob", "type": "typing"}),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // 之后的内容消息落库，说明前面的事件已处理完
        harness
            .post(
                "/api/v1/messages",
                "alice",
                json!({"target_username": "bob", "content": "after", "type": "newMessage"}),
            )
            .await;
        harness.wait_for_stored(1).await;

        let page = harness
            .store
            .list_for_user(HistoryQuery::recent(Username::parse("bob").unwrap(), 10))
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].content(), "after");
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected() {
        let harness = Harness::new();
        let (status, body) = harness
            .post(
                "/api/v1/messages",
                "alice",
                json!({"target_username": "", "content": "x", "type": "newMessage"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn page_size_is_capped() {
        let harness = Harness::new();
        let (status, page) = harness
            .get("/api/v1/messages?limit=1000&offset=3", Some("bob"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["limit"], 100);
        assert_eq!(page["offset"], 3);
    }

    #[tokio::test]
    async fn online_list_starts_empty() {
        let harness = Harness::new();
        let (status, body) = harness.get("/api/v1/online", Some("alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"], json!([]));
    }
}
