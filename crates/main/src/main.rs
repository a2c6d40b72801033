//! 主应用程序入口
//!
//! 加载配置，选择消息存储，启动消息中心与 Axum Web API 服务。

use std::{sync::Arc, time::Duration};

use application::{Hub, InMemoryMessageRepository, MessageRepository, SystemClock};
use config::{AppConfig, StorageBackend};
use infrastructure::{create_pg_pool, PgMessageRepository, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

const HUB_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;

    let messages = build_store(&config).await?;

    let (hub, hub_task) = Hub::spawn(&config.hub, messages.clone());

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        hub,
        messages,
        jwt_service,
        Arc::new(SystemClock),
        config.hub.clone(),
    );

    // 启动 Web 服务器
    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("私信服务器启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 路由和所有会话释放句柄后，消息中心会把剩余消息写完再退出
    match tokio::time::timeout(HUB_DRAIN_TIMEOUT, hub_task).await {
        Ok(Ok(())) => tracing::info!("消息中心已停止"),
        Ok(Err(err)) => tracing::error!(error = %err, "消息中心异常退出"),
        Err(_) => tracing::warn!("等待消息中心退出超时"),
    }

    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn MessageRepository>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("使用内存消息存储，重启后历史将丢失");
            Ok(Arc::new(InMemoryMessageRepository::new()))
        }
        StorageBackend::Postgres => {
            tracing::info!(
                "连接数据库: {}",
                config.database.url.split('@').next_back().unwrap_or("unknown")
            );
            let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

            // 运行迁移
            MIGRATOR.run(&pool).await?;

            Ok(Arc::new(PgMessageRepository::new(pool)))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
