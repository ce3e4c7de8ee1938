//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：聊天协调器、输入校验、
//! 以及对外部适配器（存储、在线状态缓存、消息广播）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod presence;
pub mod repository;
pub mod services;

pub use broadcaster::{BroadcastError, ChatBroadcaster, RoomBroadcast, UserNotification};
pub use clock::{Clock, SystemClock};
pub use dto::{MessagePage, MessageView, RoomSummary};
pub use error::ApplicationError;
pub use presence::{PresenceError, PresenceTracker, RedisPresenceTracker};
pub use repository::{
    ChatRoomRepository, MessageRepository, ParticipantRepository, UserDirectory,
};
pub use services::{ChatService, ChatServiceDependencies};
