//! 聊天核心领域模型
//!
//! 包含聊天室、参与者、消息等核心实体，以及推送事件与领域错误。
//! 身份认证、关系型存储和实时传输由外部协作方提供，这里只定义语义。

pub mod chat_room;
pub mod errors;
pub mod events;
pub mod group;
pub mod message;
pub mod participant;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat_room::ChatRoom;
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use events::{RoomEvent, UnreadDelta};
pub use group::GroupBinding;
pub use message::Message;
pub use participant::Participant;
pub use user::{UserProfile, UNKNOWN_USER_NAME};
pub use value_objects::{GroupId, MessageContent, MessageId, RoomId, Timestamp, UserId};
