pub mod dao;
pub mod models;
pub mod service;

pub use dao::MessageDao;
pub use models::NewMessage;
pub use service::MessageService;
