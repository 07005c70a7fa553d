//! 聊天 HTTP API 客户端
//!
//! 房间创建与历史拉取走 REST，凭证通过 Authorization 头自动附带。

use crate::chat::types::{ChatMessage, RoomProjection};
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, error, info};

#[derive(Deserialize)]
struct RoomEnvelope {
    room: RoomProjection,
}

#[derive(Deserialize)]
struct RoomsEnvelope {
    rooms: Vec<RoomProjection>,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    messages: Vec<ChatMessage>,
}

/// HTTP API 客户端
pub struct ChatApi {
    http: reqwest::Client,
    base_url: String,
}

impl ChatApi {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// 创建房间（参与者按用户名，允许带 @ 前缀）
    pub async fn create_room(
        &self,
        title: &str,
        participant_usernames: &[String],
        is_group: bool,
    ) -> Result<RoomProjection> {
        let url = format!("{}/chatrooms/room", self.base_url);
        info!("[ChatApi] 📡 创建房间: title={}", title);

        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "title": title,
                "participantUsernames": participant_usernames,
                "isGroup": is_group,
            }))
            .send()
            .await?;
        let envelope: RoomEnvelope = Self::parse(resp).await?;
        info!("[ChatApi] ✅ 房间已创建: room_id={}", envelope.room.chat_room_id);
        Ok(envelope.room)
    }

    /// 当前用户的全部房间（按最近活跃排序）
    pub async fn my_rooms(&self) -> Result<Vec<RoomProjection>> {
        let url = format!("{}/chatrooms/my-rooms", self.base_url);
        debug!("[ChatApi] 📡 拉取房间列表");
        let resp = self.http.get(&url).send().await?;
        let envelope: RoomsEnvelope = Self::parse(resp).await?;
        Ok(envelope.rooms)
    }

    /// 单个房间
    pub async fn get_room(&self, room_id: &str) -> Result<RoomProjection> {
        let url = format!("{}/chatrooms/room/{room_id}", self.base_url);
        let resp = self.http.get(&url).send().await?;
        let envelope: RoomEnvelope = Self::parse(resp).await?;
        Ok(envelope.room)
    }

    /// 房间历史（按时间升序）
    pub async fn room_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>> {
        let url = format!("{}/chatrooms/room/{room_id}/messages", self.base_url);
        debug!("[ChatApi] 📡 拉取历史: room_id={}", room_id);
        let resp = self.http.get(&url).send().await?;
        let envelope: MessagesEnvelope = Self::parse(resp).await?;
        Ok(envelope.messages)
    }

    async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| text.clone());
            error!("[ChatApi] 请求失败, HTTP状态: {}, 响应: {}", status, detail);
            return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, detail));
        }
        serde_json::from_str(&text).with_context(|| format!("响应解析失败: {text}"))
    }
}
