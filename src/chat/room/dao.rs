//! 房间数据访问层（DAO）
//!
//! 负责所有房间相关的数据库操作，将数据访问逻辑与业务逻辑分离。
//! 投影聚合（参与者用户名/ID 数组）在这里完成：SQLite 没有
//! ARRAY_AGG，改为按房间连续排序后在内存折叠。

use crate::chat::error::ChatError;
use crate::chat::room::models::NewRoom;
use crate::chat::types::RoomProjection;
use sqlx::{Pool, Row, Sqlite, Transaction};

/// 房间 DAO（基于 sqlx）
#[derive(Clone)]
pub struct RoomDao {
    db: Pool<Sqlite>,
}

impl RoomDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 按规范化成员对查找既有直聊房间
    pub async fn find_direct_room_id(&self, direct_key: &str) -> Result<Option<String>, ChatError> {
        let row = sqlx::query(
            "SELECT chat_room_id FROM chat_rooms WHERE is_direct = 1 AND direct_key = ?",
        )
        .bind(direct_key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| r.get("chat_room_id")))
    }

    /// 在事务内插入房间行。
    /// direct_key 的唯一约束冲突映射为 `Conflict`，由服务层回查既有房间。
    pub async fn insert_room(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        room: &NewRoom,
    ) -> Result<(), ChatError> {
        let res = sqlx::query(
            r#"
            INSERT INTO chat_rooms (chat_room_id, created_by, title, is_direct, direct_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&room.chat_room_id)
        .bind(&room.created_by)
        .bind(&room.title)
        .bind(if room.is_direct { 1 } else { 0 })
        .bind(&room.direct_key)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&mut **tx)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(ChatError::Conflict(format!(
                    "直聊房间已存在: direct_key={:?}",
                    room.direct_key
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 在事务内插入一条参与者行
    pub async fn insert_participant(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        participant_id: &str,
        chat_room_id: &str,
        user_id: &str,
        joined_at: i64,
    ) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO chat_room_participants (participant_id, chat_room_id, user_id, joined_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(participant_id)
        .bind(chat_room_id)
        .bind(user_id)
        .bind(joined_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// 事务内统计参与者行数（插入后的不变量检查用）
    pub async fn count_participants(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        chat_room_id: &str,
    ) -> Result<i64, ChatError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_room_participants WHERE chat_room_id = ?",
        )
        .bind(chat_room_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    /// 成员资格检查：每个变更操作（join/send）都重新查库，不缓存
    pub async fn is_participant(
        &self,
        chat_room_id: &str,
        user_id: &str,
    ) -> Result<bool, ChatError> {
        let row = sqlx::query(
            "SELECT 1 FROM chat_room_participants WHERE chat_room_id = ? AND user_id = ?",
        )
        .bind(chat_room_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.is_some())
    }

    /// 获取单个房间投影（含参与者聚合），不存在返回 None
    pub async fn get_projection(
        &self,
        chat_room_id: &str,
    ) -> Result<Option<RoomProjection>, ChatError> {
        let rows = sqlx::query(
            r#"
            SELECT
                cr.chat_room_id,
                cr.title,
                cr.is_direct,
                cr.created_by,
                cr.created_at,
                cr.updated_at,
                u.user_id,
                u.username
            FROM chat_rooms cr
            JOIN chat_room_participants crp ON cr.chat_room_id = crp.chat_room_id
            JOIN users u ON crp.user_id = u.user_id
            WHERE cr.chat_room_id = ?
            ORDER BY u.username ASC
            "#,
        )
        .bind(chat_room_id)
        .fetch_all(&self.db)
        .await?;

        Ok(Self::fold_rows(rows).into_iter().next())
    }

    /// 用户参与的全部房间投影，按 updated_at 降序（最近活跃优先）
    pub async fn list_projections_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<RoomProjection>, ChatError> {
        let rows = sqlx::query(
            r#"
            SELECT
                cr.chat_room_id,
                cr.title,
                cr.is_direct,
                cr.created_by,
                cr.created_at,
                cr.updated_at,
                u.user_id,
                u.username
            FROM chat_rooms cr
            JOIN chat_room_participants crp ON cr.chat_room_id = crp.chat_room_id
            JOIN users u ON crp.user_id = u.user_id
            WHERE cr.chat_room_id IN (
                SELECT chat_room_id FROM chat_room_participants WHERE user_id = ?
            )
            ORDER BY cr.updated_at DESC, cr.chat_room_id ASC, u.username ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(Self::fold_rows(rows))
    }

    /// 把按房间连续排序的行折叠为投影列表（行序即输出序）
    fn fold_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Vec<RoomProjection> {
        let mut result: Vec<RoomProjection> = Vec::new();
        for row in rows {
            let room_id: String = row.get("chat_room_id");
            let user_id: String = row.get("user_id");
            let username: String = row.get("username");

            match result.last_mut() {
                Some(last) if last.chat_room_id == room_id => {
                    last.participants.push(username);
                    last.participant_ids.push(user_id);
                }
                _ => {
                    let is_direct: i64 = row.get("is_direct");
                    result.push(RoomProjection {
                        chat_room_id: room_id,
                        title: row.get("title"),
                        is_direct: is_direct != 0,
                        created_by: row.get("created_by"),
                        created_at: row.get("created_at"),
                        updated_at: row.get("updated_at"),
                        participants: vec![username],
                        participant_ids: vec![user_id],
                    });
                }
            }
        }
        result
    }
}
