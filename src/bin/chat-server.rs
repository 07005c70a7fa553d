//! 聊天服务端
//!
//! 同时拉起 REST 接口与 WebSocket 实时网关，两边共享同一个
//! SQLite 连接池与服务层。Ctrl+C 退出。

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use studybuddy_chat::chat::db::create_sqlite_pool_with_migration;
use studybuddy_chat::chat::gateway::{ChatGateway, RoomRegistry};
use studybuddy_chat::chat::identity::{DbIdentityProvider, IdentityProvider};
use studybuddy_chat::chat::message::MessageService;
use studybuddy_chat::chat::rest::{router, RestState};
use studybuddy_chat::chat::room::RoomService;
use tracing::{error, info};

/// 聊天服务端
#[derive(Parser, Debug)]
#[command(name = "chat-server")]
#[command(about = "学习搭子聊天服务端 - REST + WebSocket 网关", long_about = None)]
struct Args {
    /// SQLite 数据库 URL（默认: sqlite://chat.db?mode=rwc）
    #[arg(long, default_value = "sqlite://chat.db?mode=rwc")]
    db_url: String,

    /// REST 监听地址
    #[arg(long, default_value = "127.0.0.1:9000")]
    http_addr: String,

    /// WebSocket 网关监听地址
    #[arg(long, default_value = "127.0.0.1:9001")]
    ws_addr: String,

    /// 连接认证时限（秒）
    #[arg(long, default_value = "5")]
    auth_timeout: u64,

    /// 日志级别（默认: info,studybuddy_chat=debug）
    #[arg(long, default_value = "info,studybuddy_chat=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("chat-server.log")
        .expect("无法创建日志文件 chat-server.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[Server] 📝 日志已同时输出到控制台和文件: chat-server.log");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!("[Server] 🚀 启动: db={}", args.db_url);
    let db = create_sqlite_pool_with_migration(&args.db_url).await?;

    let identity: Arc<dyn IdentityProvider> = Arc::new(DbIdentityProvider::new(db.clone()));
    let rooms = Arc::new(RoomService::new(db.clone(), identity.clone()));
    let messages = Arc::new(MessageService::new(db.clone(), rooms.clone()));
    let registry = Arc::new(RoomRegistry::new());

    // REST
    let app = router(RestState {
        identity: identity.clone(),
        rooms: rooms.clone(),
        messages: messages.clone(),
        registry: registry.clone(),
    });
    let http_listener = tokio::net::TcpListener::bind(&args.http_addr).await?;
    info!("[Server] 🌐 REST 接口已启动: {}", args.http_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            error!("[Server] REST 服务退出: {}", e);
        }
    });

    // 实时网关
    let gateway = ChatGateway::new(
        identity,
        rooms,
        messages,
        registry,
        Duration::from_secs(args.auth_timeout),
    );
    let ws_listener = tokio::net::TcpListener::bind(&args.ws_addr).await?;
    tokio::spawn(async move {
        if let Err(e) = gateway.serve(ws_listener).await {
            error!("[Server] 网关退出: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("[Server] 👋 收到退出信号，关闭");
    Ok(())
}
