//! 聊天协调器
//!
//! 所有聊天操作的唯一入口：成员校验走成员注册表，写入走消息日志或
//! 在线状态缓存，派生状态（未读数）按需计算，结果经广播网关推出。
//! 在线状态缓存故障按降级处理（所有人视为离线，宁可多发通知），
//! 持久化存储故障则向调用方传播。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    ChatRoom, DomainError, Message, MessageContent, MessageId, Participant, RoomEvent, RoomId,
    UnreadDelta, UserId, UserProfile, UNKNOWN_USER_NAME,
};

use crate::{
    broadcaster::ChatBroadcaster,
    clock::Clock,
    dto::{MessagePage, MessageView, RoomSummary},
    error::ApplicationError,
    presence::PresenceTracker,
    repository::{ChatRoomRepository, MessageRepository, ParticipantRepository, UserDirectory},
};

pub struct ChatServiceDependencies {
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub participant_repository: Arc<dyn ParticipantRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub presence: Arc<dyn PresenceTracker>,
    pub broadcaster: Arc<dyn ChatBroadcaster>,
    pub clock: Arc<dyn Clock>,
    /// 未指定时的消息分页大小。
    pub default_page_size: u32,
}

pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    // 成员校验：每个房间操作的准入门
    async fn require_room(&self, room_id: RoomId) -> Result<ChatRoom, ApplicationError> {
        self.deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound.into())
    }

    async fn require_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        if !self
            .deps
            .participant_repository
            .is_member(room_id, user_id)
            .await?
        {
            return Err(DomainError::NotAParticipant.into());
        }
        Ok(())
    }

    /// 在线状态查询的降级包装：缓存故障时按离线处理。
    async fn presence_is_active(&self, room_id: RoomId, user_id: UserId) -> bool {
        match self.deps.presence.is_active(room_id, user_id).await {
            Ok(active) => active,
            Err(err) => {
                tracing::warn!(
                    room_id = %room_id,
                    user_id = %user_id,
                    error = %err,
                    "在线状态缓存不可用，按离线处理"
                );
                false
            }
        }
    }

    /// 创建或复用 1:1 房间。
    ///
    /// 已存在的两人房间（未绑定组队记录）直接返回，幂等。
    pub async fn create_direct_room(
        &self,
        user_id: UserId,
        other_user_id: UserId,
    ) -> Result<ChatRoom, ApplicationError> {
        if user_id == other_user_id {
            return Err(DomainError::SelfChatNotAllowed.into());
        }

        self.deps
            .user_directory
            .find_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;
        self.deps
            .user_directory
            .find_by_id(other_user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        if let Some(existing) = self
            .deps
            .room_repository
            .find_direct_between(user_id, other_user_id)
            .await?
        {
            return Ok(existing);
        }

        let now = self.deps.clock.now();
        let room = self
            .deps
            .room_repository
            .create_direct(user_id, other_user_id, now)
            .await?;

        tracing::info!(room_id = %room.id, user_a = %user_id, user_b = %other_user_id, "创建 1:1 聊天房间");
        Ok(room)
    }

    /// 组队成立时创建组队房间（房间 + 发起人 + 组队绑定记录）。
    pub async fn create_group_room(
        &self,
        owner_id: UserId,
        title: &str,
    ) -> Result<ChatRoom, ApplicationError> {
        self.deps
            .user_directory
            .find_by_id(owner_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        let now = self.deps.clock.now();
        let (room, binding) = self
            .deps
            .room_repository
            .create_group(owner_id, title, now)
            .await?;

        tracing::info!(room_id = %room.id, group_id = %binding.id, "创建组队聊天房间");
        Ok(room)
    }

    /// 加入房间（组队加入等场景；1:1 房间在创建时就带上双方）。
    pub async fn join_room(&self, user_id: UserId, room_id: RoomId) -> Result<(), ApplicationError> {
        self.require_room(room_id).await?;
        self.deps
            .user_directory
            .find_by_id(user_id)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        // 已是成员则是幂等成功
        if self
            .deps
            .participant_repository
            .is_member(room_id, user_id)
            .await?
        {
            return Ok(());
        }

        let now = self.deps.clock.now();
        self.deps
            .participant_repository
            .add(Participant::new(room_id, user_id, now))
            .await?;
        Ok(())
    }

    /// 发送消息。
    ///
    /// 追加在前、推进自己的已读指针在后：两步之间崩溃只会少算发送者
    /// 自己的已读进度，下次 open 自愈，不会污染共享状态。
    pub async fn send_message(
        &self,
        user_id: UserId,
        room_id: RoomId,
        content: impl Into<String>,
    ) -> Result<MessageView, ApplicationError> {
        self.require_room(room_id).await?;
        self.require_membership(room_id, user_id).await?;

        let content = MessageContent::new(content)?;
        let now = self.deps.clock.now();

        let message = self
            .deps
            .message_repository
            .append(room_id, user_id, content, now)
            .await?;

        let sender = self.deps.user_directory.find_by_id(user_id).await?;

        // 广播给房间内所有订阅者
        if let Err(broadcast_error) = self
            .deps
            .broadcaster
            .publish_to_room(room_id, RoomEvent::message_created(&message, sender.as_ref()))
            .await
        {
            tracing::error!(
                room_id = %room_id,
                message_id = %message.id,
                error = %broadcast_error,
                "消息已持久化，但房间广播失败"
            );
            return Err(broadcast_error.into());
        }

        // 发送者正开着房间时，发送即视为读到该消息
        if self.presence_is_active(room_id, user_id).await {
            self.deps
                .participant_repository
                .advance_last_read(room_id, user_id, message.id)
                .await?;
        }

        self.notify_inactive_participants(room_id, user_id).await?;

        Ok(MessageView::from_message(&message, sender.as_ref()))
    }

    /// 给房间内非活跃参与者推送未读数增量。
    ///
    /// 活跃参与者已经通过房间广播收到消息本体，不再重复通知。
    /// 单个用户队列推送失败只记警告，不中断其余扇出。
    async fn notify_inactive_participants(
        &self,
        room_id: RoomId,
        sender_id: UserId,
    ) -> Result<(), ApplicationError> {
        let participants = self
            .deps
            .participant_repository
            .list_by_room(room_id)
            .await?;

        for participant in participants {
            if participant.user_id == sender_id {
                continue;
            }
            if self.presence_is_active(room_id, participant.user_id).await {
                continue;
            }

            let unread_count = self
                .deps
                .message_repository
                .count_unread_since(
                    room_id,
                    participant.last_read_message_id,
                    participant.user_id,
                )
                .await?;

            if let Err(err) = self
                .deps
                .broadcaster
                .publish_to_user(participant.user_id, UnreadDelta::new(room_id, unread_count))
                .await
            {
                tracing::warn!(
                    room_id = %room_id,
                    user_id = %participant.user_id,
                    error = %err,
                    "未读数通知推送失败"
                );
            } else {
                tracing::debug!(
                    room_id = %room_id,
                    user_id = %participant.user_id,
                    unread_count,
                    "已推送未读数通知"
                );
            }
        }

        Ok(())
    }

    /// 游标翻页取历史消息，ID 降序（窗口内新消息在前）。
    pub async fn list_messages(
        &self,
        user_id: UserId,
        room_id: RoomId,
        cursor: Option<MessageId>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ApplicationError> {
        self.require_room(room_id).await?;
        self.require_membership(room_id, user_id).await?;

        let limit = limit.unwrap_or(self.deps.default_page_size).max(1);
        let messages = self
            .deps
            .message_repository
            .list_before(room_id, cursor, limit)
            .await?;

        // 取满一页即认为可能还有下一页
        let has_next = messages.len() as u32 >= limit;
        let next_cursor = if has_next {
            messages.last().map(|message| message.id)
        } else {
            None
        };

        let views = self.resolve_message_views(&messages).await?;

        tracing::debug!(
            room_id = %room_id,
            count = views.len(),
            has_next,
            "拉取历史消息"
        );

        Ok(MessagePage {
            messages: views,
            has_next,
            next_cursor,
        })
    }

    async fn resolve_message_views(
        &self,
        messages: &[Message],
    ) -> Result<Vec<MessageView>, ApplicationError> {
        let mut profiles: HashMap<UserId, Option<UserProfile>> = HashMap::new();
        let mut views = Vec::with_capacity(messages.len());

        for message in messages {
            let sender = match message.sender_id {
                Some(sender_id) => {
                    if !profiles.contains_key(&sender_id) {
                        let profile = self.deps.user_directory.find_by_id(sender_id).await?;
                        profiles.insert(sender_id, profile);
                    }
                    profiles.get(&sender_id).and_then(|p| p.as_ref())
                }
                None => None,
            };
            views.push(MessageView::from_message(message, sender));
        }

        Ok(views)
    }

    /// 删除自己发的消息，并向房间主题广播删除事件。
    pub async fn delete_message(
        &self,
        user_id: UserId,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<(), ApplicationError> {
        let message = self
            .deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .filter(|message| message.room_id == room_id)
            .ok_or(DomainError::MessageNotFound)?;

        // 作者已注销的消息不属于任何人，同样拒绝
        if !message.is_authored_by(user_id) {
            return Err(DomainError::NotMessageAuthor.into());
        }

        self.deps.message_repository.delete(message_id).await?;

        if let Err(broadcast_error) = self
            .deps
            .broadcaster
            .publish_to_room(room_id, RoomEvent::message_deleted(message_id))
            .await
        {
            tracing::error!(
                room_id = %room_id,
                message_id = %message_id,
                error = %broadcast_error,
                "消息已删除，但删除事件广播失败"
            );
            return Err(broadcast_error.into());
        }

        Ok(())
    }

    /// 打开房间：标记在线，并把已读指针推进到当前最新消息
    /// （同一逻辑步骤内未读数归零）。
    pub async fn open_room(&self, user_id: UserId, room_id: RoomId) -> Result<(), ApplicationError> {
        self.require_room(room_id).await?;
        self.require_membership(room_id, user_id).await?;

        if let Err(err) = self.deps.presence.mark_active(room_id, user_id).await {
            tracing::warn!(room_id = %room_id, user_id = %user_id, error = %err, "在线标记写入失败");
        }

        let latest = self.deps.message_repository.latest_id(room_id).await?;
        self.deps
            .participant_repository
            .advance_last_read(room_id, user_id, latest)
            .await?;

        tracing::info!(room_id = %room_id, user_id = %user_id, "用户打开房间");
        Ok(())
    }

    /// 关闭房间：清除在线标记，不触碰已读指针。
    pub async fn close_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        self.require_room(room_id).await?;
        self.require_membership(room_id, user_id).await?;

        if let Err(err) = self.deps.presence.mark_inactive(room_id, user_id).await {
            tracing::warn!(room_id = %room_id, user_id = %user_id, error = %err, "在线标记删除失败");
        }

        tracing::info!(room_id = %room_id, user_id = %user_id, "用户关闭房间");
        Ok(())
    }

    /// 心跳续期。标记已过期时是 no-op，不会复活在线状态。
    pub async fn refresh_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        self.require_room(room_id).await?;
        self.require_membership(room_id, user_id).await?;

        if let Err(err) = self.deps.presence.refresh(room_id, user_id).await {
            tracing::warn!(room_id = %room_id, user_id = %user_id, error = %err, "在线标记续期失败");
        }

        Ok(())
    }

    /// 离开房间；最后一个参与者离开时级联删除房间与组队绑定记录。
    pub async fn leave_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        self.require_room(room_id).await?;
        self.require_membership(room_id, user_id).await?;

        self.deps
            .participant_repository
            .remove(room_id, user_id)
            .await?;

        let remaining = self
            .deps
            .participant_repository
            .count_by_room(room_id)
            .await?;
        if remaining == 0 {
            // 两个删除都幂等，并发离开收敛到同一个空房间也安全
            self.deps.room_repository.delete_group_binding(room_id).await?;
            self.deps.room_repository.delete(room_id).await?;
            tracing::info!(room_id = %room_id, "房间已清空，级联删除");
        }

        Ok(())
    }

    /// 用户的房间列表：标题、最新消息预览、未读数，按最近活跃降序。
    pub async fn list_rooms(&self, user_id: UserId) -> Result<Vec<RoomSummary>, ApplicationError> {
        let rooms = self.deps.room_repository.list_by_user(user_id).await?;
        let mut summaries = Vec::with_capacity(rooms.len());

        for room in rooms {
            let title = self.resolve_room_title(room.id, user_id).await?;
            let latest = self.deps.message_repository.find_latest(room.id).await?;

            let unread_count = match self
                .deps
                .participant_repository
                .find(room.id, user_id)
                .await?
            {
                Some(participant) => {
                    self.deps
                        .message_repository
                        .count_unread_since(room.id, participant.last_read_message_id, user_id)
                        .await?
                }
                None => 0,
            };

            let (preview, last_activity_at) = match &latest {
                Some(message) => (message.content.as_str().to_string(), message.created_at),
                None => (String::new(), room.created_at),
            };

            summaries.push(RoomSummary {
                room_id: room.id,
                title,
                unread_count,
                last_message_preview: preview,
                last_activity_at,
            });
        }

        summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(summaries)
    }

    /// 房间标题：组队房间用组队标题，1:1 房间用对方昵称。
    async fn resolve_room_title(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<String, ApplicationError> {
        if let Some(binding) = self.deps.room_repository.find_group_binding(room_id).await? {
            return Ok(binding.title);
        }

        let participants = self
            .deps
            .participant_repository
            .list_by_room(room_id)
            .await?;

        let mut names = Vec::new();
        for participant in participants {
            if participant.user_id == user_id {
                continue;
            }
            let name = self
                .deps
                .user_directory
                .find_by_id(participant.user_id)
                .await?
                .map(|profile| profile.name)
                .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string());
            names.push(name);
        }

        if names.is_empty() {
            Ok(UNKNOWN_USER_NAME.to_string())
        } else {
            Ok(names.join(", "))
        }
    }
}
