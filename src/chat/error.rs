//! 聊天核心的错误分类
//!
//! 所有校验错误都在产生任何持久化副作用之前返回；
//! REST 层按 kind 映射 HTTP 状态码，实时通道只把错误回发给来源连接。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// 参数不合法：空标题、空消息、无效的参与者列表等
    #[error("参数错误: {0}")]
    InvalidArgument(String),

    /// 凭证缺失或无效
    #[error("未认证: {0}")]
    Unauthenticated(String),

    /// 已认证但无权操作目标房间，或声称的用户名与认证身份不符
    #[error("无权限: {0}")]
    Forbidden(String),

    /// 房间或用户不存在
    #[error("不存在: {0}")]
    NotFound(String),

    /// 并发创建直聊房间撞上唯一约束；内部回查既有房间解决，不对调用方暴露
    #[error("冲突: {0}")]
    Conflict(String),

    /// 事务内不变量检查失败或底层存储错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Internal(format!("数据库错误: {e}"))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
