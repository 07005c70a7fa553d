pub mod chat;

// 重新导出常用类型，方便外部使用
pub use chat::{
    client::{ChatApi, ChatClient, ChatListener, ClientConfig, EmptyChatListener, SessionState},
    error::ChatError,
    gateway::{ChatGateway, RoomRegistry},
    identity::{DbIdentityProvider, IdentityProvider, Principal},
    message::MessageService,
    rest::{router, RestState},
    room::RoomService,
    types::{Attachment, ChatMessage, ClientEvent, RoomProjection, ServerEvent},
};
