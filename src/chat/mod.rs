//! 聊天核心模块
//!
//! 服务端（房间目录、消息存储、REST、实时网关）与客户端 SDK
//! 共用本模块的类型与错误分类。

pub mod client;
pub mod db;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod message;
pub mod rest;
pub mod room;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil {
    use sqlx::{Pool, Sqlite};
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// 初始化测试日志（只初始化一次，输出到测试捕获器）
    pub fn init_test_logger() {
        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter("debug")
                .with_test_writer()
                .init();
        });
    }

    /// 单连接内存库（已执行迁移）
    pub async fn setup_db() -> Pool<Sqlite> {
        crate::chat::db::create_memory_pool_with_migration()
            .await
            .expect("创建内存库失败")
    }

    /// 写入一个用户及其凭证（users / user_tokens 表由外部身份系统维护，
    /// 测试里直接插入）
    pub async fn seed_user(db: &Pool<Sqlite>, user_id: &str, username: &str, token: &str) {
        sqlx::query("INSERT INTO users (user_id, username) VALUES (?, ?)")
            .bind(user_id)
            .bind(username)
            .execute(db)
            .await
            .expect("插入用户失败");
        sqlx::query("INSERT INTO user_tokens (token, user_id) VALUES (?, ?)")
            .bind(token)
            .bind(user_id)
            .execute(db)
            .await
            .expect("插入凭证失败");
    }
}
