//! 身份校验：外部认证系统在本 crate 内的最小投影
//!
//! 聊天核心不签发、不解析凭证，只把不透明 bearer 凭证换成
//! `Principal`（用户 ID + 用户名）。实时通道与 REST 共用同一套校验，
//! 所有变更操作都以服务端解析出的身份为准，客户端上报的 username
//! 只做防御性比对。

use crate::chat::error::ChatError;
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 已认证主体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 校验不透明 bearer 凭证，失败返回 `Unauthenticated`
    async fn verify_token(&self, token: &str) -> Result<Principal, ChatError>;

    /// 按用户名精确解析（区分大小写），返回 (已解析, 未命中) 两组
    async fn resolve_usernames(
        &self,
        usernames: &[String],
    ) -> Result<(Vec<Principal>, Vec<String>), ChatError>;
}

/// 基于 users / user_tokens 表的实现（表由外部身份系统写入，这里只读）
pub struct DbIdentityProvider {
    db: Pool<Sqlite>,
}

impl DbIdentityProvider {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityProvider for DbIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<Principal, ChatError> {
        if token.is_empty() {
            return Err(ChatError::Unauthenticated("缺少凭证".to_string()));
        }

        let row = sqlx::query(
            r#"
            SELECT u.user_id, u.username
            FROM user_tokens t
            JOIN users u ON t.user_id = u.user_id
            WHERE t.token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let principal = Principal {
                    user_id: row.get("user_id"),
                    username: row.get("username"),
                };
                debug!("[Identity] 凭证校验通过: user={}", principal.username);
                Ok(principal)
            }
            None => Err(ChatError::Unauthenticated("凭证无效".to_string())),
        }
    }

    async fn resolve_usernames(
        &self,
        usernames: &[String],
    ) -> Result<(Vec<Principal>, Vec<String>), ChatError> {
        let mut resolved = Vec::with_capacity(usernames.len());
        let mut missing = Vec::new();

        for name in usernames {
            let row = sqlx::query("SELECT user_id, username FROM users WHERE username = ?")
                .bind(name)
                .fetch_optional(&self.db)
                .await?;
            match row {
                Some(row) => resolved.push(Principal {
                    user_id: row.get("user_id"),
                    username: row.get("username"),
                }),
                None => missing.push(name.clone()),
            }
        }

        Ok((resolved, missing))
    }
}
