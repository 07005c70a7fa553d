//! 聊天客户端 SDK
//!
//! 面向终端/桌面调用方的会话控制器：HTTP 拉取房间与历史，
//! WebSocket 接收实时事件，本地维护当前选中房间的消息视图
//! （乐观占位、回声合并、按 id 去重）。

pub mod api;
pub mod listener;
pub mod session;

pub use api::ChatApi;
pub use listener::{ChatListener, EmptyChatListener};
pub use session::{DeliveryStatus, RoomSwitch, SessionMessage, SessionState};

use crate::chat::types::{Attachment, ClientEvent, ServerEvent};
use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 认证 token
    pub token: String,
    /// 本端用户名（事件上报时附带，服务端会与认证身份比对）
    pub username: String,
    /// WebSocket 网关地址
    pub ws_url: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
}

impl ClientConfig {
    pub fn new(token: String, username: String) -> Self {
        Self {
            token,
            username,
            ws_url: "ws://localhost:9001".to_string(),
            api_base_url: "http://localhost:9000".to_string(),
        }
    }
}

/// 聊天客户端
#[derive(Clone)]
pub struct ChatClient {
    config: ClientConfig,
    api: Arc<ChatApi>,
    writer: Option<Arc<Mutex<WsWriter>>>,
    session: Arc<Mutex<SessionState>>,
    listener: Arc<dyn ChatListener>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(ChatApi::new(&config.api_base_url, &config.token)?);
        Ok(Self {
            config,
            api,
            writer: None,
            session: Arc::new(Mutex::new(SessionState::new())),
            listener: Arc::new(EmptyChatListener),
        })
    }

    /// 注册事件监听器（须在 connect 之前调用）
    pub fn set_listener(&mut self, listener: Arc<dyn ChatListener>) {
        self.listener = listener;
    }

    pub fn api(&self) -> Arc<ChatApi> {
        self.api.clone()
    }

    /// 连接网关并在内部启动事件处理与心跳
    pub async fn connect(&mut self) -> Result<()> {
        let url = format!("{}/?token={}", self.config.ws_url, self.config.token);
        info!("[ChatClient] 🔗 连接实时网关 (user={})", self.config.username);

        let (ws_stream, response) = connect_async(&url).await.context("网关连接失败")?;
        info!("[ChatClient] ✅ WebSocket 连接成功, 状态: {}", response.status());

        let (write, read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(write));
        self.writer = Some(writer.clone());

        // 心跳
        let writer_for_heartbeat = writer.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(25));
            loop {
                ticker.tick().await;
                let mut w = writer_for_heartbeat.lock().await;
                if w.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        });

        // 拉取初始房间列表
        let rooms = self.api.my_rooms().await?;
        {
            let mut session = self.session.lock().await;
            session.set_rooms(rooms);
        }

        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.handle_events(read).await {
                error!("[ChatClient] 事件处理错误: {}", e);
            }
        });

        let listener = self.listener.clone();
        tokio::spawn(async move {
            listener.on_connection_status_changed(true).await;
        });

        Ok(())
    }

    /// 切换选中房间：退订旧房间、订阅新房间、拉取历史
    pub async fn select_room(&self, room_id: &str) -> Result<()> {
        let switch = {
            let mut session = self.session.lock().await;
            session.select_room(room_id)
        };

        if let Some(leave) = switch.leave {
            self.send_client_event(&ClientEvent::LeaveRoom {
                chat_room_id: leave,
            })
            .await?;
        }
        if let Some(join) = switch.join {
            self.send_client_event(&ClientEvent::JoinRoom {
                chat_room_id: join.clone(),
                username: self.config.username.clone(),
            })
            .await?;

            let history = self.api.room_messages(&join).await?;
            let mut session = self.session.lock().await;
            session.set_history(&join, history);
        }
        Ok(())
    }

    /// 发送消息：先登记乐观占位，再经网关发出。
    /// 返回占位的本地 id，失败时占位被标记为 Failed 而不是移除。
    pub async fn send_message(
        &self,
        content: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<String> {
        let (room_id, local_id) = {
            let mut session = self.session.lock().await;
            let room_id = session
                .active_room()
                .map(|r| r.to_string())
                .ok_or_else(|| anyhow::anyhow!("未选中房间"))?;
            let local_id = session.add_placeholder(
                &room_id,
                &self.config.username,
                content.clone(),
                attachments.clone(),
            );
            (room_id, local_id)
        };

        let event = ClientEvent::SendMessage {
            room_id,
            content,
            attachments,
            username: self.config.username.clone(),
        };
        if let Err(e) = self.send_client_event(&event).await {
            let mut session = self.session.lock().await;
            session.mark_failed(&local_id);
            return Err(e);
        }
        Ok(local_id)
    }

    /// 当前会话视图快照（房间列表 + 选中房间的消息）
    pub async fn session_snapshot(&self) -> SessionState {
        self.session.lock().await.clone()
    }

    async fn send_client_event(&self, event: &ClientEvent) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("未连接"))?;
        let text = serde_json::to_string(event)?;
        let mut w = writer.lock().await;
        w.send(WsMessage::Text(text)).await.context("发送事件失败")?;
        Ok(())
    }

    /// 处理服务器事件（事件循环）
    async fn handle_events(&self, mut read: WsReader) -> Result<()> {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => self.apply_event(event).await,
                    Err(e) => debug!("[ChatClient] 未识别的事件，忽略: {}, 原始: {}", e, text),
                },
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    warn!("[ChatClient] 👋 连接关闭: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("[ChatClient] WebSocket 错误: {}", e);
                    break;
                }
                _ => {}
            }
        }

        let listener = self.listener.clone();
        tokio::spawn(async move {
            listener.on_connection_status_changed(false).await;
        });
        Ok(())
    }

    async fn apply_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(msg) => {
                {
                    let mut session = self.session.lock().await;
                    session.on_new_message(msg.clone(), chrono::Utc::now().timestamp_millis());
                }
                let listener = self.listener.clone();
                tokio::spawn(async move {
                    listener.on_new_message(msg).await;
                });
            }
            ServerEvent::RoomCreated(room) => {
                let accepted = {
                    let mut session = self.session.lock().await;
                    session.on_room_created(room.clone())
                };
                if accepted {
                    let listener = self.listener.clone();
                    tokio::spawn(async move {
                        listener.on_room_created(room).await;
                    });
                }
            }
            ServerEvent::RoomJoined { chat_room_id } => {
                debug!("[ChatClient] 已订阅房间: {}", chat_room_id);
                let listener = self.listener.clone();
                tokio::spawn(async move {
                    listener.on_room_joined(chat_room_id).await;
                });
            }
            ServerEvent::Error { message } => {
                warn!("[ChatClient] ⚠️ 服务器错误事件: {}", message);
                {
                    // 错误事件没有关联 id，把最近一条待确认消息标记为失败
                    let mut session = self.session.lock().await;
                    session.mark_latest_pending_failed();
                }
                let listener = self.listener.clone();
                tokio::spawn(async move {
                    listener.on_error(message).await;
                });
            }
        }
    }
}
