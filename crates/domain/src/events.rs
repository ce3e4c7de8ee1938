//! 推送事件
//!
//! 定义广播网关向外发布的事件形状：房间主题上的新消息 / 消息删除事件，
//! 以及发往单个用户私有队列的未读数增量。

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::user::{UserProfile, UNKNOWN_USER_NAME};
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 房间主题事件，发给所有订阅了该房间的客户端。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// 新消息
    MessageCreated {
        message_id: MessageId,
        sender_id: Option<UserId>,
        sender_name: String,
        content: String,
        created_at: Timestamp,
    },

    /// 消息已删除
    MessageDeleted { message_id: MessageId },
}

impl RoomEvent {
    /// 由持久化后的消息和发送者档案构造新消息事件。
    pub fn message_created(message: &Message, sender: Option<&UserProfile>) -> Self {
        RoomEvent::MessageCreated {
            message_id: message.id,
            sender_id: message.sender_id,
            sender_name: sender
                .map(|profile| profile.name.clone())
                .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
            content: message.content.as_str().to_string(),
            created_at: message.created_at,
        }
    }

    pub fn message_deleted(message_id: MessageId) -> Self {
        RoomEvent::MessageDeleted { message_id }
    }
}

/// 未读数增量，发往单个非活跃参与者的私有通知队列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadDelta {
    pub room_id: RoomId,
    pub unread_count: u64,
}

impl UnreadDelta {
    pub fn new(room_id: RoomId, unread_count: u64) -> Self {
        Self {
            room_id,
            unread_count,
        }
    }
}
