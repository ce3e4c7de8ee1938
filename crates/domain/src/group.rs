use serde::{Deserialize, Serialize};

use crate::value_objects::{GroupId, RoomId};

/// 组队记录与聊天室的绑定。
///
/// 组队板块本身由外部协作方管理，聊天核心只关心三件事：
/// 1:1 去重查询要排除绑定了组队记录的房间；房间列表用组队标题做展示；
/// 房间清空时级联删除绑定记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBinding {
    pub id: GroupId,
    pub room_id: RoomId,
    pub title: String,
}

impl GroupBinding {
    pub fn new(id: GroupId, room_id: RoomId, title: impl Into<String>) -> Self {
        Self {
            id,
            room_id,
            title: title.into(),
        }
    }
}
