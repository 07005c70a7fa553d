//! 消息相关的数据模型

use crate::chat::types::Attachment;

/// 待插入的消息行（id 与时间戳由服务层分配）
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: String,
    pub chat_room_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub message_content: Option<String>,
    pub attachments: Vec<Attachment>,
    pub timestamp: i64,
}
