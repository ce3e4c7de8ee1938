use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

/// 聊天消息。
///
/// 追加后不可变，只支持硬删除（日志中不保留墓碑，删除事件只走推送通道）。
/// 作者账号注销后 `sender_id` 为 `None`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: Option<UserId>,
    pub content: MessageContent,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        room_id: RoomId,
        sender_id: Option<UserId>,
        content: MessageContent,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            room_id,
            sender_id,
            content,
            created_at,
        }
    }

    /// 消息是否由指定用户发出。作者已注销的消息不属于任何人。
    pub fn is_authored_by(&self, user_id: UserId) -> bool {
        self.sender_id == Some(user_id)
    }
}
