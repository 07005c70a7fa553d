//! REST 接口
//!
//! 房间创建与历史拉取走 HTTP，实时投递走网关。两边共用同一套
//! 身份校验与服务层；创建成功后经注册表向全部参与者的在线连接
//! 推送 roomCreated。

use crate::chat::error::ChatError;
use crate::chat::gateway::RoomRegistry;
use crate::chat::identity::{IdentityProvider, Principal};
use crate::chat::message::MessageService;
use crate::chat::room::RoomService;
use crate::chat::types::ServerEvent;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// REST 层共享状态
#[derive(Clone)]
pub struct RestState {
    pub identity: Arc<dyn IdentityProvider>,
    pub rooms: Arc<RoomService>,
    pub messages: Arc<MessageService>,
    pub registry: Arc<RoomRegistry>,
}

/// 组装路由（my-rooms 的静态段与 :room_id 参数段由 axum 区分）
pub fn router(state: RestState) -> Router {
    Router::new()
        .route("/chatrooms/room", post(create_room))
        .route("/chatrooms/my-rooms", get(my_rooms))
        .route("/chatrooms/room/:room_id", get(get_room))
        .route("/chatrooms/room/:room_id/messages", get(room_messages))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    title: String,
    #[serde(default)]
    participant_usernames: Vec<String>,
    #[serde(default)]
    is_group: bool,
}

async fn create_room(
    State(state): State<RestState>,
    headers: HeaderMap,
    Json(body): Json<CreateRoomRequest>,
) -> Result<Response, ChatError> {
    let principal = authenticate(&state, &headers).await?;
    let room = state
        .rooms
        .create_room(
            &principal.user_id,
            &body.title,
            &body.participant_usernames,
            body.is_group,
        )
        .await?;

    info!(
        "[REST] 房间创建请求完成: user={}, room_id={}",
        principal.username, room.chat_room_id
    );

    // 参与者的在线连接立即得到通知，无需等下一次列表刷新
    state
        .registry
        .notify_users(
            &room.participant_ids,
            &ServerEvent::RoomCreated(room.clone()),
        )
        .await;

    Ok((StatusCode::CREATED, Json(json!({ "room": room }))).into_response())
}

async fn my_rooms(
    State(state): State<RestState>,
    headers: HeaderMap,
) -> Result<Response, ChatError> {
    let principal = authenticate(&state, &headers).await?;
    let rooms = state.rooms.list_my_rooms(&principal.user_id).await?;
    // 列表随消息活动实时变化，禁止任何中间缓存
    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(json!({ "rooms": rooms })),
    )
        .into_response())
}

async fn get_room(
    State(state): State<RestState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Response, ChatError> {
    let principal = authenticate(&state, &headers).await?;
    let room = state.rooms.get_room(&room_id, &principal.user_id).await?;
    Ok(Json(json!({ "room": room })).into_response())
}

async fn room_messages(
    State(state): State<RestState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Response, ChatError> {
    let principal = authenticate(&state, &headers).await?;
    let messages = state
        .messages
        .list_room_messages(&room_id, &principal.user_id)
        .await?;
    Ok(Json(json!({ "messages": messages })).into_response())
}

/// 从 `Authorization: Bearer <token>` 解析并校验身份
async fn authenticate(state: &RestState, headers: &HeaderMap) -> Result<Principal, ChatError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ChatError::Unauthenticated("缺少 Authorization 头".to_string()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ChatError::Unauthenticated("Authorization 头格式错误".to_string()))?;
    state.identity.verify_token(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::identity::DbIdentityProvider;
    use crate::chat::testutil::{init_test_logger, seed_user, setup_db};
    use crate::chat::types::{ChatMessage, RoomProjection};

    struct TestEnv {
        base_url: String,
        http: reqwest::Client,
        registry: Arc<RoomRegistry>,
    }

    /// 起一个真实 HTTP 服务：内存库 + 随机端口
    async fn start_rest() -> TestEnv {
        init_test_logger();
        let db = setup_db().await;
        seed_user(&db, "u1", "alice", "tok1").await;
        seed_user(&db, "u2", "bob", "tok2").await;
        seed_user(&db, "u3", "carol", "tok3").await;

        let identity: Arc<dyn IdentityProvider> = Arc::new(DbIdentityProvider::new(db.clone()));
        let rooms = Arc::new(RoomService::new(db.clone(), identity.clone()));
        let messages = Arc::new(MessageService::new(db.clone(), rooms.clone()));
        let registry = Arc::new(RoomRegistry::new());

        let app = router(RestState {
            identity,
            rooms,
            messages,
            registry: registry.clone(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        TestEnv {
            base_url: format!("http://{addr}"),
            http: reqwest::Client::new(),
            registry,
        }
    }

    async fn create_room(env: &TestEnv, token: &str, title: &str, names: &[&str]) -> RoomProjection {
        let resp = env
            .http
            .post(format!("{}/chatrooms/room", env.base_url))
            .bearer_auth(token)
            .json(&json!({ "title": title, "participantUsernames": names }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: serde_json::Value = resp.json().await.unwrap();
        serde_json::from_value(body["room"].clone()).unwrap()
    }

    #[tokio::test]
    async fn create_room_and_fetch_history_over_http() {
        let env = start_rest().await;
        let room = create_room(&env, "tok1", "alice & bob", &["@bob"]).await;
        assert!(room.is_direct);
        assert_eq!(room.participants, vec!["alice", "bob"]);

        // bob 也能看到这间房
        let resp = env
            .http
            .get(format!("{}/chatrooms/room/{}", env.base_url, room.chat_room_id))
            .bearer_auth("tok2")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["room"]["chat_room_id"], room.chat_room_id);

        // carol 不是成员
        let resp = env
            .http
            .get(format!("{}/chatrooms/room/{}", env.base_url, room.chat_room_id))
            .bearer_auth("tok3")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);

        // 历史为空但可访问
        let resp = env
            .http
            .get(format!(
                "{}/chatrooms/room/{}/messages",
                env.base_url, room.chat_room_id
            ))
            .bearer_auth("tok1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        let history: Vec<ChatMessage> = serde_json::from_value(body["messages"].clone()).unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn repeated_direct_room_creation_returns_same_room() {
        let env = start_rest().await;
        let first = create_room(&env, "tok1", "alice & bob", &["bob"]).await;
        let second = create_room(&env, "tok2", "bob & alice", &["alice"]).await;
        assert_eq!(first.chat_room_id, second.chat_room_id);
    }

    #[tokio::test]
    async fn my_rooms_is_marked_uncacheable() {
        let env = start_rest().await;

        let resp = env
            .http
            .get(format!("{}/chatrooms/my-rooms", env.base_url))
            .bearer_auth("tok1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("cache-control").unwrap().to_str().unwrap(),
            "no-store"
        );
        let body: serde_json::Value = resp.json().await.unwrap();
        let rooms: Vec<RoomProjection> = serde_json::from_value(body["rooms"].clone()).unwrap();
        assert!(rooms.is_empty());
    }

    #[tokio::test]
    async fn requests_without_valid_bearer_are_rejected() {
        let env = start_rest().await;

        let resp = env
            .http
            .get(format!("{}/chatrooms/my-rooms", env.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp = env
            .http
            .get(format!("{}/chatrooms/my-rooms", env.base_url))
            .bearer_auth("no-such-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp = env
            .http
            .post(format!("{}/chatrooms/room", env.base_url))
            .bearer_auth("tok1")
            .json(&json!({ "title": "x", "participantUsernames": ["no-such-user"] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn create_room_notifies_online_participants() {
        let env = start_rest().await;

        // bob 的一条在线连接（直接挂进注册表，绕过网关）
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        env.registry.register(1, "u2", tx).await;

        let room = create_room(&env, "tok1", "alice & bob", &["bob"]).await;

        let frame = rx.try_recv().expect("参与者应收到 roomCreated 通知");
        let text = match frame {
            tokio_tungstenite::tungstenite::Message::Text(t) => t,
            other => panic!("期望文本帧，得到 {other:?}"),
        };
        let event: ServerEvent = serde_json::from_str(&text).unwrap();
        match event {
            ServerEvent::RoomCreated(created) => {
                assert_eq!(created.chat_room_id, room.chat_room_id)
            }
            other => panic!("期望 roomCreated，得到 {other:?}"),
        }
    }
}
