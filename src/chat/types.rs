//! 实时通道线格式与共享投影结构
//!
//! 实时事件采用 `{"event": "...", "data": {...}}` 的文本 JSON 帧，
//! 事件名与负载字段使用 camelCase；数据库投影字段保持 snake_case，
//! 与 REST 响应一致。

use serde::{Deserialize, Serialize};

/// 消息附件（name/url/type/size），存储时整体序列化为 JSON 数组文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default)]
    pub size: i64,
}

/// 房间投影：房间行 + 按用户名排序聚合的参与者
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomProjection {
    pub chat_room_id: String,
    pub title: String,
    pub is_direct: bool,
    pub created_by: String,
    /// unix 毫秒
    pub created_at: i64,
    /// unix 毫秒，每次新消息落库时推进
    pub updated_at: i64,
    /// 参与者用户名（按用户名升序）
    pub participants: Vec<String>,
    /// 与 participants 同序的用户 ID
    pub participant_ids: Vec<String>,
}

impl RoomProjection {
    /// 成员不变量：任何房间至少两人，直聊恰好两人
    pub fn participants_valid(&self) -> bool {
        if self.is_direct {
            self.participant_ids.len() == 2
        } else {
            self.participant_ids.len() >= 2
        }
    }
}

/// 已持久化的消息（服务端分配 id 与时间戳）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub chat_room_id: String,
    pub sender_id: String,
    pub sender_username: String,
    /// 可为空：允许纯附件消息
    pub message_content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// unix 毫秒，展示顺序的唯一依据
    pub timestamp: i64,
    #[serde(default)]
    pub is_read: bool,
}

/// 客户端 → 服务器 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinRoom")]
    JoinRoom {
        #[serde(rename = "chatRoomId")]
        chat_room_id: String,
        username: String,
    },
    #[serde(rename = "leaveRoom")]
    LeaveRoom {
        #[serde(rename = "chatRoomId")]
        chat_room_id: String,
    },
    #[serde(rename = "sendMessage")]
    SendMessage {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
        username: String,
    },
}

/// 服务器 → 客户端 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "roomJoined")]
    RoomJoined {
        #[serde(rename = "chatRoomId")]
        chat_room_id: String,
    },
    #[serde(rename = "newMessage")]
    NewMessage(ChatMessage),
    #[serde(rename = "roomCreated")]
    RoomCreated(RoomProjection),
    #[serde(rename = "error")]
    Error { message: String },
}
