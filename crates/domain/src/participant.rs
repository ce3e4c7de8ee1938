use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

/// 聊天室参与者。
///
/// 每个 (room, user) 唯一，携带已读进度指针。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// 最后已读消息 ID，`MessageId::NONE` 表示尚未读过任何消息。
    pub last_read_message_id: MessageId,
    pub joined_at: Timestamp,
}

impl Participant {
    /// 新加入的参与者，已读指针从 0 开始。
    pub fn new(room_id: RoomId, user_id: UserId, joined_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            last_read_message_id: MessageId::NONE,
            joined_at,
        }
    }

    /// 推进已读指针。只前进不后退，保证未读数单调收敛。
    pub fn advance_last_read(&mut self, message_id: MessageId) {
        if message_id > self.last_read_message_id {
            self.last_read_message_id = message_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn new_participant_has_read_nothing() {
        let participant = Participant::new(RoomId(1), UserId(2), Utc::now());
        assert_eq!(participant.last_read_message_id, MessageId::NONE);
    }

    #[test]
    fn read_pointer_never_moves_backwards() {
        let mut participant = Participant::new(RoomId(1), UserId(2), Utc::now());
        participant.advance_last_read(MessageId(10));
        participant.advance_last_read(MessageId(3));
        assert_eq!(participant.last_read_message_id, MessageId(10));
    }
}
