#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{Hub, InMemoryMessageRepository, SystemClock};
use config::HubConfig;
use domain::Username;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 在随机端口上启动的测试服务，使用内存存储
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub store: Arc<InMemoryMessageRepository>,
    jwt: JwtService,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(HubConfig::default()).await
    }

    pub async fn start_with(hub_config: HubConfig) -> Self {
        let store = Arc::new(InMemoryMessageRepository::new());
        let (hub, _hub_task) = Hub::spawn(&hub_config, store.clone());
        let jwt = JwtService::new(JwtConfig {
            secret: "integration-test-secret-key-long-enough".to_string(),
            expiration_hours: 1,
        });
        let state = AppState::new(
            hub,
            store.clone(),
            Arc::new(jwt.clone()),
            Arc::new(SystemClock),
            hub_config,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            client: Client::new(),
            store,
            jwt,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token(&self, username: &str) -> String {
        self.jwt
            .generate_token(Uuid::new_v4(), &Username::parse(username).expect("username"))
            .expect("token")
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    /// 建立连接并等待注册完成
    pub async fn connect(&self, username: &str) -> WsClient {
        let (socket, _) = connect_async(self.ws_url(&self.token(username)))
            .await
            .expect("websocket connect");
        self.wait_online(username).await;
        socket
    }

    pub async fn online(&self, as_user: &str) -> Vec<String> {
        let body: Value = self
            .client
            .get(self.http("/api/v1/online"))
            .bearer_auth(self.token(as_user))
            .send()
            .await
            .expect("online request")
            .json()
            .await
            .expect("online json");
        body["users"]
            .as_array()
            .expect("users array")
            .iter()
            .filter_map(|user| user.as_str().map(str::to_string))
            .collect()
    }

    pub async fn wait_online(&self, username: &str) {
        for _ in 0..100 {
            if self.online(username).await.iter().any(|user| user == username) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("{username} never came online");
    }

    pub async fn wait_offline(&self, username: &str) {
        for _ in 0..100 {
            if !self.online(username).await.iter().any(|user| user == username) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("{username} never went offline");
    }

    pub async fn wait_stored(&self, count: usize) {
        for _ in 0..100 {
            if self.store.len().await >= count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("store never reached {count} messages");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// 读取下一条 JSON 文本帧
pub async fn next_json(socket: &mut WsClient) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("json frame")
            }
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// 等待服务端关闭连接
pub async fn expect_closed(socket: &mut WsClient) {
    loop {
        match timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for close")
        {
            None | Some(Err(_)) | Some(Ok(TungsteniteMessage::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

/// 确认一段时间内没有新的文本帧
pub async fn expect_silence(socket: &mut WsClient) {
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) =
        timeout(Duration::from_millis(200), socket.next()).await
    {
        panic!("unexpected frame: {}", text.as_str());
    }
}
