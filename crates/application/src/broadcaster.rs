use async_trait::async_trait;
use domain::{RoomEvent, RoomId, UnreadDelta, UserId};
use thiserror::Error;

/// 房间主题上的一次推送。
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RoomBroadcast {
    pub room_id: RoomId,
    pub event: RoomEvent,
}

/// 单个用户私有队列上的一次推送。
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserNotification {
    pub user_id: UserId,
    pub delta: UnreadDelta,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 广播网关：无状态的扇出出口，可并发调用，不持有任何锁。
/// 连接管理、握手、重连都是实时传输协作方的事。
#[async_trait]
pub trait ChatBroadcaster: Send + Sync {
    /// 发布到房间主题，所有订阅该房间的客户端可见。
    async fn publish_to_room(
        &self,
        room_id: RoomId,
        event: RoomEvent,
    ) -> Result<(), BroadcastError>;

    /// 发布到单个用户的私有通知队列。
    async fn publish_to_user(
        &self,
        user_id: UserId,
        delta: UnreadDelta,
    ) -> Result<(), BroadcastError>;
}
