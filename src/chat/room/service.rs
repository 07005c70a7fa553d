//! 房间目录服务
//!
//! 房间创建、去重、成员校验与列表/单查。创建采用
//! "先查后插 + 唯一约束兜底" 策略：并发竞争时后写入方收到
//! 唯一约束冲突，回查既有房间返回，保证同一对用户只有一个直聊房间。

use crate::chat::error::ChatError;
use crate::chat::identity::IdentityProvider;
use crate::chat::room::dao::RoomDao;
use crate::chat::room::models::{direct_key, NewRoom};
use crate::chat::types::RoomProjection;
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 房间目录服务，持有 DAO 与身份解析器
pub struct RoomService {
    db: Pool<Sqlite>,
    dao: RoomDao,
    identity: Arc<dyn IdentityProvider>,
}

impl RoomService {
    pub fn new(db: Pool<Sqlite>, identity: Arc<dyn IdentityProvider>) -> Self {
        let dao = RoomDao::new(db.clone());
        Self { db, dao, identity }
    }

    /// 创建房间（或返回既有直聊房间）。
    ///
    /// - participant_usernames 中每个名字去掉前导 '@' 后精确匹配；
    ///   任何一个未命中则整体失败，错误信息列出全部未命中名字
    /// - 发起者始终计入成员，成员集合按用户 ID 去重
    /// - 去重后恰好两人且未显式要求群聊时视为直聊，直聊按成员对去重
    pub async fn create_room(
        &self,
        requester_id: &str,
        title: &str,
        participant_usernames: &[String],
        is_group: bool,
    ) -> Result<RoomProjection, ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::InvalidArgument("房间标题不能为空".to_string()));
        }

        // 去掉前导 '@'（客户端输入习惯），其余部分精确匹配
        let normalized: Vec<String> = participant_usernames
            .iter()
            .map(|name| name.trim().trim_start_matches('@').to_string())
            .filter(|name| !name.is_empty())
            .collect();

        let (resolved, missing) = self.identity.resolve_usernames(&normalized).await?;
        if !missing.is_empty() {
            return Err(ChatError::NotFound(format!(
                "用户不存在: {}",
                missing.join(", ")
            )));
        }

        // 发起者并入成员集合，按用户 ID 去重（保持出现顺序）
        let mut seen: HashSet<String> = HashSet::new();
        let mut member_ids: Vec<String> = Vec::with_capacity(resolved.len() + 1);
        seen.insert(requester_id.to_string());
        member_ids.push(requester_id.to_string());
        for p in &resolved {
            if seen.insert(p.user_id.clone()) {
                member_ids.push(p.user_id.clone());
            }
        }

        if member_ids.len() < 2 {
            return Err(ChatError::InvalidArgument(
                "房间至少需要两名成员".to_string(),
            ));
        }

        let is_direct = member_ids.len() == 2 && !is_group;
        let key = if is_direct {
            Some(direct_key(&member_ids[0], &member_ids[1]))
        } else {
            None
        };

        // 直聊先查既有房间，命中直接返回（不新建）
        if let Some(ref key) = key {
            if let Some(room_id) = self.dao.find_direct_room_id(key).await? {
                debug!("[RoomSvc] 直聊房间已存在，直接返回: room_id={}", room_id);
                return self.projection_or_internal(&room_id).await;
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let room = NewRoom {
            chat_room_id: uuid::Uuid::new_v4().to_string(),
            created_by: requester_id.to_string(),
            title: title.to_string(),
            is_direct,
            direct_key: key.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.insert_room_tx(&room, &member_ids, now).await {
            Ok(()) => {
                info!(
                    "[RoomSvc] ✅ 房间创建成功: room_id={}, 成员数={}, 直聊={}",
                    room.chat_room_id,
                    member_ids.len(),
                    is_direct
                );
                self.projection_or_internal(&room.chat_room_id).await
            }
            // 并发竞争：另一请求已插入同一直聊房间，回查既有房间
            Err(ChatError::Conflict(msg)) => {
                let key = key.ok_or_else(|| ChatError::Internal(msg.clone()))?;
                warn!("[RoomSvc] ⚠️ 直聊创建冲突，回查既有房间: {}", msg);
                let room_id = self
                    .dao
                    .find_direct_room_id(&key)
                    .await?
                    .ok_or_else(|| ChatError::Internal(msg))?;
                self.projection_or_internal(&room_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// 事务内写入房间行与全部参与者行，末尾复核成员不变量
    async fn insert_room_tx(
        &self,
        room: &NewRoom,
        member_ids: &[String],
        joined_at: i64,
    ) -> Result<(), ChatError> {
        let mut tx = self.db.begin().await?;

        self.dao.insert_room(&mut tx, room).await?;
        for user_id in member_ids {
            self.dao
                .insert_participant(
                    &mut tx,
                    &uuid::Uuid::new_v4().to_string(),
                    &room.chat_room_id,
                    user_id,
                    joined_at,
                )
                .await?;
        }

        // 提交前复核：参与者不足两行说明上面某一步被绕过，整体回滚
        let count = self.dao.count_participants(&mut tx, &room.chat_room_id).await?;
        if count < 2 {
            tx.rollback().await?;
            return Err(ChatError::Internal(format!(
                "房间参与者不足，已回滚: room_id={}, count={}",
                room.chat_room_id, count
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    /// 获取当前用户的全部房间，按最近活跃排序。
    /// 成员数不满足不变量的房间视为损坏数据，记录警告后从结果中剔除。
    pub async fn list_my_rooms(&self, user_id: &str) -> Result<Vec<RoomProjection>, ChatError> {
        let rooms = self.dao.list_projections_for_user(user_id).await?;
        let mut valid = Vec::with_capacity(rooms.len());
        for room in rooms {
            if room.participants_valid() {
                valid.push(room);
            } else {
                warn!(
                    "[RoomSvc] ⚠️ 房间成员数异常，已从列表剔除: room_id={}, 成员数={}",
                    room.chat_room_id,
                    room.participant_ids.len()
                );
            }
        }
        Ok(valid)
    }

    /// 获取单个房间。检查顺序：存在性 → 数据完整性 → 成员资格
    pub async fn get_room(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<RoomProjection, ChatError> {
        let room = self
            .dao
            .get_projection(room_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("房间不存在: {room_id}")))?;

        if !room.participants_valid() {
            warn!(
                "[RoomSvc] ⚠️ 房间成员数异常: room_id={}, 成员数={}",
                room.chat_room_id,
                room.participant_ids.len()
            );
            return Err(ChatError::InvalidArgument(format!(
                "房间数据异常，无法展示: {room_id}"
            )));
        }

        if !room.participant_ids.iter().any(|id| id == user_id) {
            return Err(ChatError::Forbidden("不是该房间的成员".to_string()));
        }

        Ok(room)
    }

    /// 成员资格检查（供消息服务与网关复用）
    pub async fn is_participant(&self, room_id: &str, user_id: &str) -> Result<bool, ChatError> {
        self.dao.is_participant(room_id, user_id).await
    }

    async fn projection_or_internal(&self, room_id: &str) -> Result<RoomProjection, ChatError> {
        self.dao
            .get_projection(room_id)
            .await?
            .ok_or_else(|| ChatError::Internal(format!("房间投影读取失败: {room_id}")))
    }
}
