//! 应用层数据传输对象

use serde::{Deserialize, Serialize};

use domain::{Message, MessageId, RoomId, Timestamp, UserId, UserProfile, UNKNOWN_USER_NAME};

/// 消息视图，带上发送者展示名。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: Option<UserId>,
    pub sender_name: String,
    pub content: String,
    pub created_at: Timestamp,
}

impl MessageView {
    pub fn from_message(message: &Message, sender: Option<&UserProfile>) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            sender_name: sender
                .map(|profile| profile.name.clone())
                .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
            content: message.content.as_str().to_string(),
            created_at: message.created_at,
        }
    }
}

/// 一页消息（游标翻页）。
///
/// `has_next` 用"取满一页即认为还有下一页"的启发式，页边界处可能
/// 假阳性，代价只是一次空的后续请求。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub has_next: bool,
    pub next_cursor: Option<MessageId>,
}

/// 房间列表里的一项。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub title: String,
    pub unread_count: u64,
    pub last_message_preview: String,
    pub last_activity_at: Timestamp,
}
