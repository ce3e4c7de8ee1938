use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 已注销或查不到的用户的展示名。
pub const UNKNOWN_USER_NAME: &str = "未知用户";

/// 用户档案（身份协作方的只读视图）。
///
/// 聊天核心只需要 ID 和展示名，用于广播载荷与房间标题。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
}

impl UserProfile {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
