pub mod dao;
pub mod models;
pub mod service;

pub use dao::RoomDao;
pub use models::NewRoom;
pub use service::RoomService;
