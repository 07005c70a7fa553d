//! 房间相关的数据模型

/// 待插入的房间行
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub chat_room_id: String,
    pub created_by: String,
    pub title: String,
    pub is_direct: bool,
    /// 直聊的规范化成员对（"小id:大id"），群聊为 None
    pub direct_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// 由两个用户 ID 生成直聊房间的规范化去重键。
/// 与成员顺序无关：同一对用户永远得到同一个键。
pub fn direct_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}
