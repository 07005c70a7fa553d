//! 实时网关
//!
//! 基于 tokio-tungstenite 的 WebSocket 接入层：每个连接一个读任务、
//! 一个写任务和一个心跳任务，房间订阅关系集中在 [`RoomRegistry`]。
//! 校验失败只回发给来源连接，合法消息先落库再广播。

pub mod connection;
pub mod registry;

pub use registry::RoomRegistry;

use crate::chat::error::ChatError;
use crate::chat::identity::IdentityProvider;
use crate::chat::message::MessageService;
use crate::chat::room::RoomService;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 网关共享状态（每个连接任务持有一份 Arc）
pub struct GatewayState {
    pub identity: Arc<dyn IdentityProvider>,
    pub rooms: Arc<RoomService>,
    pub messages: Arc<MessageService>,
    pub registry: Arc<RoomRegistry>,
    /// 握手后完成身份校验的时限，超时即断开
    pub auth_timeout: Duration,
}

/// WebSocket 网关
pub struct ChatGateway {
    state: Arc<GatewayState>,
}

impl ChatGateway {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        rooms: Arc<RoomService>,
        messages: Arc<MessageService>,
        registry: Arc<RoomRegistry>,
        auth_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(GatewayState {
                identity,
                rooms,
                messages,
                registry,
                auth_timeout,
            }),
        }
    }

    /// 接入循环：每个入站连接独立 spawn，单连接故障不影响其他连接
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ChatError> {
        let addr = listener
            .local_addr()
            .map_err(|e| ChatError::Internal(format!("网关监听地址获取失败: {e}")))?;
        info!("[Gateway] 🚀 实时网关已启动: {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = connection::handle_connection(state, stream, peer).await {
                            error!("[Gateway] 连接处理异常: peer={}, err={:#}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    error!("[Gateway] accept 失败: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::identity::DbIdentityProvider;
    use crate::chat::testutil::{init_test_logger, seed_user, setup_db};
    use crate::chat::types::{ClientEvent, ServerEvent};
    use futures_util::{SinkExt, StreamExt};
    use sqlx::{Pool, Sqlite};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type TestWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct TestEnv {
        db: Pool<Sqlite>,
        rooms: Arc<RoomService>,
        addr: std::net::SocketAddr,
    }

    /// 起一个真实网关：内存库 + 随机端口
    async fn start_gateway() -> TestEnv {
        init_test_logger();
        let db = setup_db().await;
        seed_user(&db, "u1", "alice", "tok1").await;
        seed_user(&db, "u2", "bob", "tok2").await;
        seed_user(&db, "u3", "carol", "tok3").await;

        let identity: Arc<dyn IdentityProvider> = Arc::new(DbIdentityProvider::new(db.clone()));
        let rooms = Arc::new(RoomService::new(db.clone(), identity.clone()));
        let messages = Arc::new(MessageService::new(db.clone(), rooms.clone()));
        let registry = Arc::new(RoomRegistry::new());

        let gateway = ChatGateway::new(
            identity,
            rooms.clone(),
            messages,
            registry,
            Duration::from_secs(5),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = gateway.serve(listener).await;
        });

        TestEnv { db, rooms, addr }
    }

    async fn connect(addr: std::net::SocketAddr, token: &str) -> TestWs {
        let url = format!("ws://{addr}/?token={token}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    /// 读到下一个文本帧并解析为服务器事件（跳过 Ping/Pong）
    async fn recv_event(ws: &mut TestWs) -> ServerEvent {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("等待服务器事件超时")
                .expect("连接已关闭")
                .expect("读取帧失败");
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).expect("事件解析失败");
            }
        }
    }

    async fn send_event(ws: &mut TestWs, event: &ClientEvent) {
        let text = serde_json::to_string(event).unwrap();
        ws.send(WsMessage::Text(text)).await.unwrap();
    }

    async fn join(ws: &mut TestWs, room_id: &str, username: &str) {
        send_event(
            ws,
            &ClientEvent::JoinRoom {
                chat_room_id: room_id.to_string(),
                username: username.to_string(),
            },
        )
        .await;
        match recv_event(ws).await {
            ServerEvent::RoomJoined { chat_room_id } => assert_eq!(chat_room_id, room_id),
            other => panic!("期望 roomJoined，得到 {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_broadcast_reaches_all_subscribers() {
        let env = start_gateway().await;
        let room = env
            .rooms
            .create_room("u1", "alice & bob", &["bob".to_string()], false)
            .await
            .unwrap();

        let mut alice = connect(env.addr, "tok1").await;
        let mut bob = connect(env.addr, "tok2").await;
        join(&mut alice, &room.chat_room_id, "alice").await;
        join(&mut bob, &room.chat_room_id, "bob").await;

        send_event(
            &mut alice,
            &ClientEvent::SendMessage {
                room_id: room.chat_room_id.clone(),
                content: Some("线性代数几点开始？".to_string()),
                attachments: vec![],
                username: "alice".to_string(),
            },
        )
        .await;

        // 发送者和其他订阅者都收到同一条广播
        for ws in [&mut alice, &mut bob] {
            match recv_event(ws).await {
                ServerEvent::NewMessage(msg) => {
                    assert_eq!(msg.chat_room_id, room.chat_room_id);
                    assert_eq!(msg.sender_username, "alice");
                    assert_eq!(msg.message_content.as_deref(), Some("线性代数几点开始？"));
                    assert!(!msg.message_id.is_empty());
                }
                other => panic!("期望 newMessage，得到 {other:?}"),
            }
        }

        // 广播之前已经落库
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_room_id = ?")
            .bind(&room.chat_room_id)
            .fetch_one(&env.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn non_participant_gets_error_without_broadcast() {
        let env = start_gateway().await;
        let room = env
            .rooms
            .create_room("u1", "alice & bob", &["bob".to_string()], false)
            .await
            .unwrap();

        let mut alice = connect(env.addr, "tok1").await;
        join(&mut alice, &room.chat_room_id, "alice").await;

        // carol 不是成员：加入被拒
        let mut carol = connect(env.addr, "tok3").await;
        send_event(
            &mut carol,
            &ClientEvent::JoinRoom {
                chat_room_id: room.chat_room_id.clone(),
                username: "carol".to_string(),
            },
        )
        .await;
        assert!(matches!(recv_event(&mut carol).await, ServerEvent::Error { .. }));

        // carol 直接发消息：错误只回给她本人
        send_event(
            &mut carol,
            &ClientEvent::SendMessage {
                room_id: room.chat_room_id.clone(),
                content: Some("让我也进来".to_string()),
                attachments: vec![],
                username: "carol".to_string(),
            },
        )
        .await;
        assert!(matches!(recv_event(&mut carol).await, ServerEvent::Error { .. }));

        // alice 那边必须安静无事
        let quiet = tokio::time::timeout(Duration::from_millis(300), alice.next()).await;
        assert!(quiet.is_err(), "非成员的消息不得广播给房间订阅者");

        // 也未落库
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_room_id = ?")
            .bind(&room.chat_room_id)
            .fetch_one(&env.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn claimed_username_must_match_authenticated_identity() {
        let env = start_gateway().await;
        let room = env
            .rooms
            .create_room("u1", "alice & bob", &["bob".to_string()], false)
            .await
            .unwrap();

        let mut alice = connect(env.addr, "tok1").await;
        send_event(
            &mut alice,
            &ClientEvent::JoinRoom {
                chat_room_id: room.chat_room_id.clone(),
                username: "bob".to_string(),
            },
        )
        .await;
        assert!(matches!(recv_event(&mut alice).await, ServerEvent::Error { .. }));
    }

    #[tokio::test]
    async fn invalid_token_is_rejected() {
        let env = start_gateway().await;

        let url = format!("ws://{}/?token=no-such-token", env.addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        // 服务端先回错误事件再关闭连接
        match recv_event(&mut ws).await {
            ServerEvent::Error { .. } => {}
            other => panic!("期望 error，得到 {other:?}"),
        }
        loop {
            match tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("等待关闭超时")
            {
                None | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    }

    #[tokio::test]
    async fn leave_room_stops_delivery() {
        let env = start_gateway().await;
        let room = env
            .rooms
            .create_room("u1", "alice & bob", &["bob".to_string()], false)
            .await
            .unwrap();

        let mut alice = connect(env.addr, "tok1").await;
        let mut bob = connect(env.addr, "tok2").await;
        join(&mut alice, &room.chat_room_id, "alice").await;
        join(&mut bob, &room.chat_room_id, "bob").await;

        send_event(
            &mut bob,
            &ClientEvent::LeaveRoom {
                chat_room_id: room.chat_room_id.clone(),
            },
        )
        .await;
        // leaveRoom 无回执，稍等注册表生效
        tokio::time::sleep(Duration::from_millis(100)).await;

        send_event(
            &mut alice,
            &ClientEvent::SendMessage {
                room_id: room.chat_room_id.clone(),
                content: Some("还有人吗".to_string()),
                attachments: vec![],
                username: "alice".to_string(),
            },
        )
        .await;
        assert!(matches!(
            recv_event(&mut alice).await,
            ServerEvent::NewMessage(_)
        ));

        // bob 已退订，不再收到广播（消息仍在库里，重新加入可拉历史）
        let quiet = tokio::time::timeout(Duration::from_millis(300), bob.next()).await;
        assert!(quiet.is_err(), "退订后不得继续收到广播");
    }
}
