//! 领域错误定义
//!
//! 业务错误（not-found / forbidden / invalid-input）与存储层故障
//! （`RepositoryError`）严格区分：前者属于领域语义，后者是基础设施问题。

use thiserror::Error;

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 聊天室不存在
    #[error("聊天室不存在")]
    RoomNotFound,

    /// 消息不存在
    #[error("消息不存在")]
    MessageNotFound,

    /// 用户不存在
    #[error("用户不存在")]
    UserNotFound,

    /// 用户不是聊天室参与者
    #[error("用户不是聊天室参与者")]
    NotAParticipant,

    /// 只有消息作者可以删除消息
    #[error("只有消息作者可以删除消息")]
    NotMessageAuthor,

    /// 不能和自己创建聊天室
    #[error("不能和自己创建聊天室")]
    SelfChatNotAllowed,

    /// 消息内容无效
    #[error("消息内容无效: {reason}")]
    InvalidContent { reason: String },
}

impl DomainError {
    pub fn invalid_content(reason: impl Into<String>) -> Self {
        Self::InvalidContent {
            reason: reason.into(),
        }
    }
}

/// 领域结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化存储错误
///
/// 对操作是致命的，直接向调用方传播，不落入业务错误分类。
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}
