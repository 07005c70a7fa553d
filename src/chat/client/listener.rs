//! 聊天事件监听器回调接口

use crate::chat::types::{ChatMessage, RoomProjection};
use async_trait::async_trait;

/// 聊天事件监听器回调接口
#[async_trait]
pub trait ChatListener: Send + Sync {
    /// 连接状态变更
    async fn on_connection_status_changed(&self, connected: bool);

    /// 新消息（已并入会话视图后回调）
    async fn on_new_message(&self, message: ChatMessage);

    /// 新房间（已通过成员不变量检查）
    async fn on_room_created(&self, room: RoomProjection);

    /// 房间订阅成功
    async fn on_room_joined(&self, chat_room_id: String);

    /// 服务器错误事件
    async fn on_error(&self, message: String);
}

/// 空实现（默认监听器）
pub struct EmptyChatListener;

#[async_trait]
impl ChatListener for EmptyChatListener {
    async fn on_connection_status_changed(&self, _connected: bool) {}
    async fn on_new_message(&self, _message: ChatMessage) {}
    async fn on_room_created(&self, _room: RoomProjection) {}
    async fn on_room_joined(&self, _chat_room_id: String) {}
    async fn on_error(&self, _message: String) {}
}
