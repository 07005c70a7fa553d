//! 消息数据访问层（DAO）
//!
//! 附件以 JSON 数组文本整列存储；读取时反序列化失败按空数组处理，
//! 不让单条脏数据拖垮整页历史。

use crate::chat::error::ChatError;
use crate::chat::message::models::NewMessage;
use crate::chat::types::{Attachment, ChatMessage};
use sqlx::{Pool, Row, Sqlite, Transaction};
use tracing::warn;

/// 消息 DAO（基于 sqlx）
#[derive(Clone)]
pub struct MessageDao {
    db: Pool<Sqlite>,
}

impl MessageDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 在事务内插入消息行（与房间 updated_at 推进同事务）
    pub async fn insert_message(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        msg: &NewMessage,
    ) -> Result<(), ChatError> {
        let attachments_json = serde_json::to_string(&msg.attachments)
            .map_err(|e| ChatError::Internal(format!("附件序列化失败: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (message_id, chat_room_id, sender_id, sender_username, message_content, attachments, timestamp, is_read)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&msg.message_id)
        .bind(&msg.chat_room_id)
        .bind(&msg.sender_id)
        .bind(&msg.sender_username)
        .bind(&msg.message_content)
        .bind(&attachments_json)
        .bind(msg.timestamp)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// 在事务内推进房间活跃时间
    pub async fn touch_room(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        chat_room_id: &str,
        updated_at: i64,
    ) -> Result<(), ChatError> {
        sqlx::query("UPDATE chat_rooms SET updated_at = ? WHERE chat_room_id = ?")
            .bind(updated_at)
            .bind(chat_room_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// 房间内全部消息，按时间戳升序（同时刻按 message_id 升序保证稳定）
    pub async fn list_by_room(&self, chat_room_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, chat_room_id, sender_id, sender_username, message_content, attachments, timestamp, is_read
            FROM messages
            WHERE chat_room_id = ?
            ORDER BY timestamp ASC, message_id ASC
            "#,
        )
        .bind(chat_room_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    /// 按 id 读取单条消息（广播前回读完整行用）
    pub async fn get_by_id(&self, message_id: &str) -> Result<Option<ChatMessage>, ChatError> {
        let row = sqlx::query(
            r#"
            SELECT message_id, chat_room_id, sender_id, sender_username, message_content, attachments, timestamp, is_read
            FROM messages
            WHERE message_id = ?
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(row_to_message))
    }
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> ChatMessage {
    let message_id: String = row.get("message_id");
    let attachments_json: String = row.get("attachments");
    let attachments: Vec<Attachment> = match serde_json::from_str(&attachments_json) {
        Ok(list) => list,
        Err(e) => {
            warn!(
                "[MsgDAO/DB] ⚠️ 附件列反序列化失败，按空处理: message_id={}, err={}",
                message_id, e
            );
            Vec::new()
        }
    };
    let is_read: i64 = row.get("is_read");

    ChatMessage {
        message_id,
        chat_room_id: row.get("chat_room_id"),
        sender_id: row.get("sender_id"),
        sender_username: row.get("sender_username"),
        message_content: row.get("message_content"),
        attachments,
        timestamp: row.get("timestamp"),
        is_read: is_read != 0,
    }
}
