//! 单连接生命周期
//!
//! 握手时从 URL 查询串取出凭证，限时完成身份校验；之后连接拆成
//! 读循环 + 独占 sink 的写任务 + 25 秒心跳任务。事件处理中的任何
//! 错误只回发给来源连接，绝不进入房间广播。

use crate::chat::error::ChatError;
use crate::chat::gateway::registry::{ConnId, FrameSender};
use crate::chat::gateway::GatewayState;
use crate::chat::identity::Principal;
use crate::chat::types::{ClientEvent, ServerEvent};
use anyhow::{Context, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

pub(crate) async fn handle_connection(
    state: Arc<GatewayState>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    // 握手回调里只做一件事：摘出 token
    let mut token: Option<String> = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        token = token_from_query(req.uri().query());
        Ok(resp)
    })
    .await
    .context("WebSocket 握手失败")?;

    let (mut sink, mut reader) = ws.split();

    let token = token.unwrap_or_default();
    let principal = match timeout(state.auth_timeout, state.identity.verify_token(&token)).await {
        Ok(Ok(p)) => p,
        Ok(Err(e)) => {
            warn!("[Gateway] 连接认证失败: peer={}, {}", peer, e);
            reject(&mut sink, &e.to_string()).await;
            return Ok(());
        }
        Err(_) => {
            warn!("[Gateway] 连接认证超时: peer={}", peer);
            reject(&mut sink, "认证超时").await;
            return Ok(());
        }
    };

    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    // 写任务独占 sink，其余任务经 channel 出帧
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let heartbeat = {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(WsMessage::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        })
    };

    state
        .registry
        .register(conn_id, &principal.user_id, tx.clone())
        .await;
    info!(
        "[Gateway] ✅ 连接就绪: conn_id={}, user={}, peer={}",
        conn_id, principal.username, peer
    );

    while let Some(frame) = reader.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                debug!("[Gateway] 读取帧失败，断开: conn_id={}, err={}", conn_id, e);
                break;
            }
        };
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(e) = dispatch(&state, conn_id, &principal, &tx, event).await {
                        warn!(
                            "[Gateway] 事件处理失败，回发来源连接: conn_id={}, {}",
                            conn_id, e
                        );
                        send_error(&tx, &e.to_string());
                    }
                }
                Err(e) => send_error(&tx, &format!("事件解析失败: {e}")),
            },
            WsMessage::Ping(payload) => {
                let _ = tx.send(WsMessage::Pong(payload));
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(conn_id, &principal.user_id).await;
    heartbeat.abort();
    drop(tx);
    let _ = writer.await;
    info!("[Gateway] 连接结束: conn_id={}, user={}", conn_id, principal.username);
    Ok(())
}

/// 处理单个客户端事件；返回的错误由调用方回发给来源连接
async fn dispatch(
    state: &GatewayState,
    conn_id: ConnId,
    principal: &Principal,
    tx: &FrameSender,
    event: ClientEvent,
) -> Result<(), ChatError> {
    match event {
        ClientEvent::JoinRoom {
            chat_room_id,
            username,
        } => {
            ensure_claimed_identity(principal, &username)?;
            if !state
                .rooms
                .is_participant(&chat_room_id, &principal.user_id)
                .await?
            {
                return Err(ChatError::Forbidden(format!(
                    "不是房间成员，禁止订阅: room_id={chat_room_id}"
                )));
            }
            state
                .registry
                .join_room(&chat_room_id, conn_id, tx.clone())
                .await;
            send_event(tx, &ServerEvent::RoomJoined { chat_room_id });
            Ok(())
        }
        // 退订是幂等的，未订阅时也静默成功
        ClientEvent::LeaveRoom { chat_room_id } => {
            state.registry.leave_room(&chat_room_id, conn_id).await;
            Ok(())
        }
        ClientEvent::SendMessage {
            room_id,
            content,
            attachments,
            username,
        } => {
            ensure_claimed_identity(principal, &username)?;
            let msg = state
                .messages
                .send_message(
                    &room_id,
                    &principal.user_id,
                    &principal.username,
                    content,
                    attachments,
                )
                .await?;
            // 先落库成功，再对全部订阅连接（含发送者）广播
            state
                .registry
                .broadcast_to_room(&room_id, &ServerEvent::NewMessage(msg))
                .await;
            Ok(())
        }
    }
}

/// 客户端上报的 username 必须与认证身份一致
fn ensure_claimed_identity(principal: &Principal, claimed: &str) -> Result<(), ChatError> {
    if claimed != principal.username {
        return Err(ChatError::Forbidden(format!(
            "上报身份与认证身份不符: 上报={claimed}, 实际={}",
            principal.username
        )));
    }
    Ok(())
}

fn send_event(tx: &FrameSender, event: &ServerEvent) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = tx.send(WsMessage::Text(text));
    }
}

fn send_error(tx: &FrameSender, message: &str) {
    send_event(
        tx,
        &ServerEvent::Error {
            message: message.to_string(),
        },
    );
}

/// 认证失败：回一帧错误事件后关闭连接
async fn reject(sink: &mut WsSink, message: &str) {
    let event = ServerEvent::Error {
        message: message.to_string(),
    };
    if let Ok(text) = serde_json::to_string(&event) {
        let _ = sink.send(WsMessage::Text(text)).await;
    }
    let _ = sink.close().await;
}

fn token_from_query(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        pair.strip_prefix("token=")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::token_from_query;

    #[test]
    fn token_extraction_from_query_string() {
        assert_eq!(
            token_from_query(Some("token=abc123")),
            Some("abc123".to_string())
        );
        assert_eq!(
            token_from_query(Some("foo=1&token=abc&bar=2")),
            Some("abc".to_string())
        );
        assert_eq!(token_from_query(Some("token=")), None);
        assert_eq!(token_from_query(Some("foo=1")), None);
        assert_eq!(token_from_query(None), None);
    }
}
