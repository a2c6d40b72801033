use sqlx::migrate::Migrator;

/// 编译期嵌入的数据库迁移
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
