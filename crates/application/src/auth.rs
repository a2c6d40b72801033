use domain::Username;
use uuid::Uuid;

use crate::error::ApplicationError;

/// 通过认证的调用者身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// 外部用户系统分配的不透明标识
    pub user_id: Uuid,
    /// 注册表键，消息中心完全信任该值
    pub username: Username,
}

/// 凭证校验端口
///
/// 在会话创建之前调用一次，不重试也不缓存。
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> Result<Identity, ApplicationError>;
}
