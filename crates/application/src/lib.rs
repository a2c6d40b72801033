//! 应用层实现。
//!
//! 这里提供实时私信消息中心（事件循环、在线注册表、内存历史），
//! 以及对外部适配器（凭证校验、持久化存储、时钟）的抽象。

pub mod auth;
pub mod clock;
pub mod error;
pub mod history;
pub mod hub;
pub mod repository;

pub use auth::{Authenticator, Identity};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ApplicationError;
pub use history::HistoryBook;
pub use hub::{Hub, HubEvent, HubHandle, OutboundFrame, SessionHandle};
pub use repository::{memory::InMemoryMessageRepository, HistoryPage, HistoryQuery, MessageRepository};
