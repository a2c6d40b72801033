//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 会话接入、REST 发消息与历史查询，
//! 所有写操作都通过消息中心的事件队列完成。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{authenticate_headers, Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
