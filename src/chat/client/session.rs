//! 会话视图状态（纯内存，不做 IO）
//!
//! 维护房间列表与当前选中房间的消息视图。消息按 message_id 合并去重，
//! 本地乐观占位在服务器回声到达时被替换：回声与占位的发送者、内容
//! 一致且占位登记不超过 30 秒，即判定为同一条消息。

use crate::chat::types::{Attachment, ChatMessage, RoomProjection};
use tracing::{debug, warn};

/// 占位与回声的匹配时限
pub const PLACEHOLDER_MATCH_WINDOW_MS: i64 = 30_000;

/// 消息投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// 已发出，等待服务器回声
    Pending,
    /// 服务器已确认（回声到达或来自他人）
    Delivered,
    /// 发送失败，保留在视图中供重试
    Failed,
}

/// 视图中的一条消息
#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub message: ChatMessage,
    pub status: DeliveryStatus,
}

/// 切换房间时需要执行的订阅变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSwitch {
    pub leave: Option<String>,
    pub join: Option<String>,
}

/// 会话视图状态
#[derive(Clone, Default)]
pub struct SessionState {
    rooms: Vec<RoomProjection>,
    active_room: Option<String>,
    messages: Vec<SessionMessage>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooms(&self) -> &[RoomProjection] {
        &self.rooms
    }

    pub fn active_room(&self) -> Option<&str> {
        self.active_room.as_deref()
    }

    pub fn messages(&self) -> &[SessionMessage] {
        &self.messages
    }

    /// 整体替换房间列表（来自 my-rooms 拉取，已按最近活跃排序）
    pub fn set_rooms(&mut self, rooms: Vec<RoomProjection>) {
        self.rooms = rooms;
    }

    /// 新房间通知。成员数不满足不变量的投影判为异常数据，拒收。
    /// 已存在的房间按 id 整体替换，返回是否已纳入视图。
    pub fn on_room_created(&mut self, room: RoomProjection) -> bool {
        if !room.participants_valid() {
            warn!(
                "[Session] ⚠️ 房间通知成员数异常，拒收: room_id={}, 成员数={}",
                room.chat_room_id,
                room.participant_ids.len()
            );
            return false;
        }
        if let Some(existing) = self
            .rooms
            .iter_mut()
            .find(|r| r.chat_room_id == room.chat_room_id)
        {
            *existing = room;
        } else {
            // 新房间排到最前（刚创建即最近活跃）
            self.rooms.insert(0, room);
        }
        true
    }

    /// 切换选中房间。返回需要退订/订阅的房间；重复选择当前房间为空操作。
    pub fn select_room(&mut self, room_id: &str) -> RoomSwitch {
        if self.active_room.as_deref() == Some(room_id) {
            return RoomSwitch {
                leave: None,
                join: None,
            };
        }
        let leave = self.active_room.replace(room_id.to_string());
        self.messages.clear();
        RoomSwitch {
            leave,
            join: Some(room_id.to_string()),
        }
    }

    /// 装入历史。仅对当前选中房间生效；
    /// 未确认的本地占位保留在历史之后，不被覆盖。
    pub fn set_history(&mut self, room_id: &str, history: Vec<ChatMessage>) {
        if self.active_room.as_deref() != Some(room_id) {
            debug!("[Session] 历史与当前房间不符，丢弃: room_id={}", room_id);
            return;
        }
        let pending: Vec<SessionMessage> = self
            .messages
            .drain(..)
            .filter(|m| m.status == DeliveryStatus::Pending)
            .collect();
        self.messages = history
            .into_iter()
            .map(|message| SessionMessage {
                message,
                status: DeliveryStatus::Delivered,
            })
            .collect();
        self.messages.extend(pending);
    }

    /// 登记乐观占位，返回本地 id。占位立即可见，回声到达后被替换。
    pub fn add_placeholder(
        &mut self,
        room_id: &str,
        username: &str,
        content: Option<String>,
        attachments: Vec<Attachment>,
    ) -> String {
        let local_id = format!("local-{}", uuid::Uuid::new_v4());
        self.messages.push(SessionMessage {
            message: ChatMessage {
                message_id: local_id.clone(),
                chat_room_id: room_id.to_string(),
                sender_id: String::new(),
                sender_username: username.to_string(),
                message_content: content,
                attachments,
                timestamp: chrono::Utc::now().timestamp_millis(),
                is_read: false,
            },
            status: DeliveryStatus::Pending,
        });
        local_id
    }

    /// 并入一条服务器消息。
    /// 合并顺序：按 message_id 替换既有条目（后到者覆盖），
    /// 其次尝试匹配本端占位，否则追加。
    pub fn on_new_message(&mut self, msg: ChatMessage, now_ms: i64) {
        if self.active_room.as_deref() != Some(msg.chat_room_id.as_str()) {
            return;
        }

        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|m| m.message.message_id == msg.message_id)
        {
            existing.message = msg;
            existing.status = DeliveryStatus::Delivered;
            return;
        }

        let matched = self.messages.iter_mut().find(|m| {
            m.status == DeliveryStatus::Pending
                && m.message.sender_username == msg.sender_username
                && m.message.message_content == msg.message_content
                && now_ms - m.message.timestamp <= PLACEHOLDER_MATCH_WINDOW_MS
        });
        if let Some(placeholder) = matched {
            placeholder.message = msg;
            placeholder.status = DeliveryStatus::Delivered;
            return;
        }

        self.messages.push(SessionMessage {
            message: msg,
            status: DeliveryStatus::Delivered,
        });
    }

    /// 标记指定占位为失败
    pub fn mark_failed(&mut self, local_id: &str) {
        if let Some(m) = self
            .messages
            .iter_mut()
            .find(|m| m.message.message_id == local_id)
        {
            m.status = DeliveryStatus::Failed;
        }
    }

    /// 服务器错误事件不带关联 id：把最近一条待确认消息标记为失败
    pub fn mark_latest_pending_failed(&mut self) {
        if let Some(m) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.status == DeliveryStatus::Pending)
        {
            m.status = DeliveryStatus::Failed;
        }
    }
}
