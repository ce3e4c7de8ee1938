//! 进程内广播网关
//!
//! 房间主题和用户私有队列各走一条 broadcast 通道，
//! 订阅方（实时传输协作方）自行按 `room_id` / `user_id` 过滤。
//! 没有订阅者时推送直接视为成功，聊天核心不因无人在线而失败。

use application::broadcaster::{BroadcastError, ChatBroadcaster, RoomBroadcast, UserNotification};
use async_trait::async_trait;
use domain::{RoomEvent, RoomId, UnreadDelta, UserId};
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct LocalChatBroadcaster {
    room_sender: broadcast::Sender<RoomBroadcast>,
    user_sender: broadcast::Sender<UserNotification>,
}

impl LocalChatBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (room_sender, _) = broadcast::channel(capacity);
        let (user_sender, _) = broadcast::channel(capacity);
        Self {
            room_sender,
            user_sender,
        }
    }

    pub fn subscribe_rooms(&self) -> broadcast::Receiver<RoomBroadcast> {
        self.room_sender.subscribe()
    }

    pub fn subscribe_users(&self) -> broadcast::Receiver<UserNotification> {
        self.user_sender.subscribe()
    }
}

#[async_trait]
impl ChatBroadcaster for LocalChatBroadcaster {
    async fn publish_to_room(
        &self,
        room_id: RoomId,
        event: RoomEvent,
    ) -> Result<(), BroadcastError> {
        if self.room_sender.receiver_count() == 0 {
            return Ok(());
        }
        self.room_sender
            .send(RoomBroadcast { room_id, event })
            .map_err(|err| BroadcastError::failed(err.to_string()))?;
        Ok(())
    }

    async fn publish_to_user(
        &self,
        user_id: UserId,
        delta: UnreadDelta,
    ) -> Result<(), BroadcastError> {
        if self.user_sender.receiver_count() == 0 {
            return Ok(());
        }
        self.user_sender
            .send(UserNotification { user_id, delta })
            .map_err(|err| BroadcastError::failed(err.to_string()))?;
        Ok(())
    }
}
