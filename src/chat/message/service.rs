//! 消息服务
//!
//! 发送前校验成员资格与内容非空，落库与房间活跃时间推进在同一事务内，
//! 事务提交后才把完整消息行交给调用方广播。

use crate::chat::error::ChatError;
use crate::chat::message::dao::MessageDao;
use crate::chat::message::models::NewMessage;
use crate::chat::room::RoomService;
use crate::chat::types::{Attachment, ChatMessage};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::info;

/// 消息服务，持有 DAO 与房间服务（成员资格检查）
pub struct MessageService {
    db: Pool<Sqlite>,
    dao: MessageDao,
    rooms: Arc<RoomService>,
}

impl MessageService {
    pub fn new(db: Pool<Sqlite>, rooms: Arc<RoomService>) -> Self {
        let dao = MessageDao::new(db.clone());
        Self { db, dao, rooms }
    }

    /// 发送一条消息。校验全部通过后才产生任何写入：
    /// - 发送者必须是房间成员，否则 `Forbidden`，不落库
    /// - 文本与附件不能同时为空，否则 `InvalidArgument`
    /// - 消息插入与房间 updated_at 推进同事务，要么都生效要么都不生效
    pub async fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        sender_username: &str,
        content: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<ChatMessage, ChatError> {
        if !self.rooms.is_participant(room_id, sender_id).await? {
            return Err(ChatError::Forbidden(format!(
                "不是房间成员，禁止发言: room_id={room_id}"
            )));
        }

        let content = content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if content.is_none() && attachments.is_empty() {
            return Err(ChatError::InvalidArgument(
                "消息内容与附件不能同时为空".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let msg = NewMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            chat_room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_username: sender_username.to_string(),
            message_content: content,
            attachments,
            timestamp: now,
        };

        let mut tx = self.db.begin().await?;
        self.dao.insert_message(&mut tx, &msg).await?;
        self.dao.touch_room(&mut tx, room_id, now).await?;
        tx.commit().await?;

        info!(
            "[MsgSvc] ✅ 消息已落库: message_id={}, room_id={}, 附件数={}",
            msg.message_id,
            room_id,
            msg.attachments.len()
        );

        // 提交后回读完整行，广播内容与持久化内容完全一致
        self.dao
            .get_by_id(&msg.message_id)
            .await?
            .ok_or_else(|| ChatError::Internal(format!("消息回读失败: {}", msg.message_id)))
    }

    /// 拉取房间历史（按时间升序）。
    /// 检查顺序与房间单查一致：存在性 → 完整性 → 成员资格。
    pub async fn list_room_messages(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.rooms.get_room(room_id, user_id).await?;
        self.dao.list_by_room(room_id).await
    }
}
