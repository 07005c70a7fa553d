//! 连接注册表：房间订阅与用户级投递的唯一事实来源
//!
//! 两张映射：rooms（房间 → 订阅连接）用于 newMessage 广播，
//! users（用户 → 该用户的全部连接）用于 roomCreated 这类不依赖
//! 房间订阅的定向通知。连接断开时两边一起清理。

use crate::chat::types::ServerEvent;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// 连接标识（进程内单调递增）
pub type ConnId = u64;

/// 连接的出站通道：写任务独占 ws sink，其余任务只持有 sender
pub type FrameSender = UnboundedSender<WsMessage>;

#[derive(Default)]
struct RegistryInner {
    /// 房间 ID → 订阅该房间的连接
    rooms: HashMap<String, HashMap<ConnId, FrameSender>>,
    /// 用户 ID → 该用户的全部在线连接
    users: HashMap<String, HashMap<ConnId, FrameSender>>,
}

/// 进程内连接注册表（多网关实例之间不共享）
#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 连接完成认证后登记到用户映射
    pub async fn register(&self, conn_id: ConnId, user_id: &str, sender: FrameSender) {
        let mut inner = self.inner.write().await;
        inner
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id, sender);
        debug!("[Registry] 连接上线: conn_id={}, user={}", conn_id, user_id);
    }

    /// 连接断开：从用户映射与所有房间订阅中移除
    pub async fn unregister(&self, conn_id: ConnId, user_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(conns) = inner.users.get_mut(user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                inner.users.remove(user_id);
            }
        }
        inner.rooms.retain(|_, subscribers| {
            subscribers.remove(&conn_id);
            !subscribers.is_empty()
        });
        debug!("[Registry] 连接下线: conn_id={}, user={}", conn_id, user_id);
    }

    /// 订阅房间（成员资格由调用方先行校验）
    pub async fn join_room(&self, room_id: &str, conn_id: ConnId, sender: FrameSender) {
        let mut inner = self.inner.write().await;
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id, sender);
    }

    /// 退订房间。退订只影响实时投递，不改动数据库里的成员关系。
    pub async fn leave_room(&self, room_id: &str, conn_id: ConnId) {
        let mut inner = self.inner.write().await;
        if let Some(subscribers) = inner.rooms.get_mut(room_id) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
    }

    /// 向房间的全部订阅连接广播（含发送者本人的连接）
    pub async fn broadcast_to_room(&self, room_id: &str, event: &ServerEvent) {
        let frame = match encode(event) {
            Some(f) => f,
            None => return,
        };
        let inner = self.inner.read().await;
        if let Some(subscribers) = inner.rooms.get(room_id) {
            for sender in subscribers.values() {
                // 发送失败说明写任务已退出，清理交给 unregister
                let _ = sender.send(frame.clone());
            }
        }
    }

    /// 向指定用户的全部在线连接投递（roomCreated 通知用）
    pub async fn notify_users(&self, user_ids: &[String], event: &ServerEvent) {
        let frame = match encode(event) {
            Some(f) => f,
            None => return,
        };
        let inner = self.inner.read().await;
        for user_id in user_ids {
            if let Some(conns) = inner.users.get(user_id) {
                for sender in conns.values() {
                    let _ = sender.send(frame.clone());
                }
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(text) => Some(WsMessage::Text(text)),
        Err(e) => {
            warn!("[Registry] ⚠️ 事件序列化失败，放弃投递: {}", e);
            None
        }
    }
}
