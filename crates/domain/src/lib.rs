//! 私信系统核心领域模型
//!
//! 包含用户名、消息等核心值对象与实体，以及错误定义。

pub mod errors;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use value_objects::*;
