use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, Timestamp};

/// 聊天室。
///
/// 只是参与者集合与消息历史的持久化容器，自身没有标题等属性：
/// 1:1 房间的标题来自对方昵称，组队房间的标题来自绑定的组队记录。
/// 不变式：参与者数量降为零的房间必须被删除（含绑定的组队记录）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub created_at: Timestamp,
}

impl ChatRoom {
    pub fn new(id: RoomId, created_at: Timestamp) -> Self {
        Self { id, created_at }
    }
}
