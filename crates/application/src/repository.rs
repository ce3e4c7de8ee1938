//! 存储端口定义
//!
//! 聊天协调器是唯一写方：消息日志与成员注册表只允许经由协调器修改，
//! 避免未读数 / 已读指针出现不一致更新。

use async_trait::async_trait;
use domain::{
    ChatRoom, GroupBinding, Message, MessageContent, MessageId, Participant, RepositoryError,
    RoomId, Timestamp, UserId, UserProfile,
};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 身份协作方的只读视图，提供广播载荷与房间标题所需的展示名。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<UserProfile>>;
}

/// 房间目录。
#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    /// 原子创建 1:1 房间：房间加两个已读指针为 0 的参与者，单事务提交。
    async fn create_direct(
        &self,
        user_a: UserId,
        user_b: UserId,
        now: Timestamp,
    ) -> RepositoryResult<ChatRoom>;

    /// 原子创建组队房间：房间、发起人参与者与组队绑定记录。
    async fn create_group(
        &self,
        owner: UserId,
        title: &str,
        now: Timestamp,
    ) -> RepositoryResult<(ChatRoom, GroupBinding)>;

    async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<ChatRoom>>;

    /// 去重查询：两名用户共同所在、且未绑定组队记录的房间。
    async fn find_direct_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> RepositoryResult<Option<ChatRoom>>;

    async fn list_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>>;

    /// 幂等删除，房间已不存在时也是成功。
    async fn delete(&self, id: RoomId) -> RepositoryResult<()>;

    async fn find_group_binding(&self, room_id: RoomId) -> RepositoryResult<Option<GroupBinding>>;

    /// 幂等删除房间绑定的组队记录。
    async fn delete_group_binding(&self, room_id: RoomId) -> RepositoryResult<()>;
}

/// 成员注册表。
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    async fn add(&self, participant: Participant) -> RepositoryResult<Participant>;
    async fn find(&self, room_id: RoomId, user_id: UserId)
        -> RepositoryResult<Option<Participant>>;
    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<bool>;
    async fn list_by_room(&self, room_id: RoomId) -> RepositoryResult<Vec<Participant>>;
    async fn count_by_room(&self, room_id: RoomId) -> RepositoryResult<u64>;
    async fn remove(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()>;

    /// 推进已读指针，只前进不后退。
    async fn advance_last_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        message_id: MessageId,
    ) -> RepositoryResult<()>;
}

/// 消息日志：按房间追加的持久化序列，ID 由存储层序列分配，
/// 并发发送不会丢失或碰撞。
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: MessageContent,
        now: Timestamp,
    ) -> RepositoryResult<Message>;

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 游标向前翻页：ID 小于 cursor 的最多 limit 条，按 ID 降序；
    /// cursor 缺省时返回最新的 limit 条。
    async fn list_before(
        &self,
        room_id: RoomId,
        cursor: Option<MessageId>,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>>;

    /// 房间内最大消息 ID，房间为空时返回 `MessageId::NONE`。
    async fn latest_id(&self, room_id: RoomId) -> RepositoryResult<MessageId>;

    /// 房间最新一条消息（房间列表预览用）。
    async fn find_latest(&self, room_id: RoomId) -> RepositoryResult<Option<Message>>;

    /// ID 大于 last_read 且发送者不是 excluding 的消息数。
    /// 作者已注销的消息不计入未读（与 SQL `<>` 对 NULL 的语义一致）。
    async fn count_unread_since(
        &self,
        room_id: RoomId,
        last_read: MessageId,
        excluding: UserId,
    ) -> RepositoryResult<u64>;

    /// 硬删除。作者校验由协调器负责。
    async fn delete(&self, id: MessageId) -> RepositoryResult<()>;
}

/// 内存实现的存储（用于测试）
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::RwLock;

    use domain::GroupId;

    #[derive(Default)]
    struct Inner {
        rooms: HashMap<RoomId, ChatRoom>,
        participants: HashMap<(RoomId, UserId), Participant>,
        messages: BTreeMap<MessageId, Message>,
        groups: HashMap<RoomId, GroupBinding>,
        users: HashMap<UserId, UserProfile>,
    }

    /// 单进程内存存储，实现全部存储端口。
    /// 消息 ID 用全局计数器分配，和数据库 BIGSERIAL 一样严格递增。
    pub struct MemoryStorage {
        inner: RwLock<Inner>,
        next_room_id: AtomicI64,
        next_message_id: AtomicI64,
        next_group_id: AtomicI64,
        next_user_id: AtomicI64,
    }

    impl Default for MemoryStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self {
                inner: RwLock::new(Inner::default()),
                next_room_id: AtomicI64::new(1),
                next_message_id: AtomicI64::new(1),
                next_group_id: AtomicI64::new(1),
                next_user_id: AtomicI64::new(1),
            }
        }

        /// 注册一个用户档案，返回分配的 ID。
        pub async fn add_user(&self, name: impl Into<String>) -> UserId {
            let id = UserId::new(self.next_user_id.fetch_add(1, Ordering::SeqCst));
            let mut inner = self.inner.write().await;
            inner.users.insert(id, UserProfile::new(id, name));
            id
        }

        /// 注销用户：消息作者置空（对应外键 ON DELETE SET NULL）。
        pub async fn remove_user(&self, user_id: UserId) {
            let mut inner = self.inner.write().await;
            inner.users.remove(&user_id);
            for message in inner.messages.values_mut() {
                if message.sender_id == Some(user_id) {
                    message.sender_id = None;
                }
            }
        }
    }

    #[async_trait]
    impl UserDirectory for MemoryStorage {
        async fn find_by_id(&self, id: UserId) -> RepositoryResult<Option<UserProfile>> {
            let inner = self.inner.read().await;
            Ok(inner.users.get(&id).cloned())
        }
    }

    #[async_trait]
    impl ChatRoomRepository for MemoryStorage {
        async fn create_direct(
            &self,
            user_a: UserId,
            user_b: UserId,
            now: Timestamp,
        ) -> RepositoryResult<ChatRoom> {
            let room_id = RoomId::new(self.next_room_id.fetch_add(1, Ordering::SeqCst));
            let room = ChatRoom::new(room_id, now);
            let mut inner = self.inner.write().await;
            inner.rooms.insert(room_id, room.clone());
            inner
                .participants
                .insert((room_id, user_a), Participant::new(room_id, user_a, now));
            inner
                .participants
                .insert((room_id, user_b), Participant::new(room_id, user_b, now));
            Ok(room)
        }

        async fn create_group(
            &self,
            owner: UserId,
            title: &str,
            now: Timestamp,
        ) -> RepositoryResult<(ChatRoom, GroupBinding)> {
            let room_id = RoomId::new(self.next_room_id.fetch_add(1, Ordering::SeqCst));
            let group_id = GroupId::new(self.next_group_id.fetch_add(1, Ordering::SeqCst));
            let room = ChatRoom::new(room_id, now);
            let binding = GroupBinding::new(group_id, room_id, title);
            let mut inner = self.inner.write().await;
            inner.rooms.insert(room_id, room.clone());
            inner
                .participants
                .insert((room_id, owner), Participant::new(room_id, owner, now));
            inner.groups.insert(room_id, binding.clone());
            Ok((room, binding))
        }

        async fn find_by_id(&self, id: RoomId) -> RepositoryResult<Option<ChatRoom>> {
            let inner = self.inner.read().await;
            Ok(inner.rooms.get(&id).cloned())
        }

        async fn find_direct_between(
            &self,
            user_a: UserId,
            user_b: UserId,
        ) -> RepositoryResult<Option<ChatRoom>> {
            let inner = self.inner.read().await;
            let room = inner
                .rooms
                .values()
                .filter(|room| !inner.groups.contains_key(&room.id))
                .find(|room| {
                    inner.participants.contains_key(&(room.id, user_a))
                        && inner.participants.contains_key(&(room.id, user_b))
                })
                .cloned();
            Ok(room)
        }

        async fn list_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<ChatRoom>> {
            let inner = self.inner.read().await;
            let mut rooms: Vec<ChatRoom> = inner
                .participants
                .keys()
                .filter(|(_, uid)| *uid == user_id)
                .filter_map(|(rid, _)| inner.rooms.get(rid).cloned())
                .collect();
            rooms.sort_by_key(|room| room.id);
            Ok(rooms)
        }

        async fn delete(&self, id: RoomId) -> RepositoryResult<()> {
            let mut inner = self.inner.write().await;
            inner.rooms.remove(&id);
            inner.participants.retain(|(rid, _), _| *rid != id);
            inner.messages.retain(|_, message| message.room_id != id);
            inner.groups.remove(&id);
            Ok(())
        }

        async fn find_group_binding(
            &self,
            room_id: RoomId,
        ) -> RepositoryResult<Option<GroupBinding>> {
            let inner = self.inner.read().await;
            Ok(inner.groups.get(&room_id).cloned())
        }

        async fn delete_group_binding(&self, room_id: RoomId) -> RepositoryResult<()> {
            let mut inner = self.inner.write().await;
            inner.groups.remove(&room_id);
            Ok(())
        }
    }

    #[async_trait]
    impl ParticipantRepository for MemoryStorage {
        async fn add(&self, participant: Participant) -> RepositoryResult<Participant> {
            let mut inner = self.inner.write().await;
            inner.participants.insert(
                (participant.room_id, participant.user_id),
                participant.clone(),
            );
            Ok(participant)
        }

        async fn find(
            &self,
            room_id: RoomId,
            user_id: UserId,
        ) -> RepositoryResult<Option<Participant>> {
            let inner = self.inner.read().await;
            Ok(inner.participants.get(&(room_id, user_id)).cloned())
        }

        async fn is_member(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<bool> {
            let inner = self.inner.read().await;
            Ok(inner.participants.contains_key(&(room_id, user_id)))
        }

        async fn list_by_room(&self, room_id: RoomId) -> RepositoryResult<Vec<Participant>> {
            let inner = self.inner.read().await;
            let mut participants: Vec<Participant> = inner
                .participants
                .values()
                .filter(|p| p.room_id == room_id)
                .cloned()
                .collect();
            participants.sort_by_key(|p| p.user_id);
            Ok(participants)
        }

        async fn count_by_room(&self, room_id: RoomId) -> RepositoryResult<u64> {
            let inner = self.inner.read().await;
            Ok(inner
                .participants
                .keys()
                .filter(|(rid, _)| *rid == room_id)
                .count() as u64)
        }

        async fn remove(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<()> {
            let mut inner = self.inner.write().await;
            inner.participants.remove(&(room_id, user_id));
            Ok(())
        }

        async fn advance_last_read(
            &self,
            room_id: RoomId,
            user_id: UserId,
            message_id: MessageId,
        ) -> RepositoryResult<()> {
            let mut inner = self.inner.write().await;
            if let Some(participant) = inner.participants.get_mut(&(room_id, user_id)) {
                participant.advance_last_read(message_id);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MessageRepository for MemoryStorage {
        async fn append(
            &self,
            room_id: RoomId,
            sender_id: UserId,
            content: MessageContent,
            now: Timestamp,
        ) -> RepositoryResult<Message> {
            let id = MessageId::new(self.next_message_id.fetch_add(1, Ordering::SeqCst));
            let message = Message::new(id, room_id, Some(sender_id), content, now);
            let mut inner = self.inner.write().await;
            inner.messages.insert(id, message.clone());
            Ok(message)
        }

        async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
            let inner = self.inner.read().await;
            Ok(inner.messages.get(&id).cloned())
        }

        async fn list_before(
            &self,
            room_id: RoomId,
            cursor: Option<MessageId>,
            limit: u32,
        ) -> RepositoryResult<Vec<Message>> {
            let inner = self.inner.read().await;
            let messages = inner
                .messages
                .values()
                .rev()
                .filter(|message| message.room_id == room_id)
                .filter(|message| cursor.map(|c| message.id < c).unwrap_or(true))
                .take(limit as usize)
                .cloned()
                .collect();
            Ok(messages)
        }

        async fn latest_id(&self, room_id: RoomId) -> RepositoryResult<MessageId> {
            let inner = self.inner.read().await;
            let latest = inner
                .messages
                .values()
                .rev()
                .find(|message| message.room_id == room_id)
                .map(|message| message.id)
                .unwrap_or(MessageId::NONE);
            Ok(latest)
        }

        async fn find_latest(&self, room_id: RoomId) -> RepositoryResult<Option<Message>> {
            let inner = self.inner.read().await;
            Ok(inner
                .messages
                .values()
                .rev()
                .find(|message| message.room_id == room_id)
                .cloned())
        }

        async fn count_unread_since(
            &self,
            room_id: RoomId,
            last_read: MessageId,
            excluding: UserId,
        ) -> RepositoryResult<u64> {
            let inner = self.inner.read().await;
            let count = inner
                .messages
                .values()
                .filter(|message| message.room_id == room_id)
                .filter(|message| message.id > last_read)
                .filter(|message| {
                    // NULL 作者不计入未读
                    message
                        .sender_id
                        .map(|sender| sender != excluding)
                        .unwrap_or(false)
                })
                .count();
            Ok(count as u64)
        }

        async fn delete(&self, id: MessageId) -> RepositoryResult<()> {
            let mut inner = self.inner.write().await;
            inner.messages.remove(&id);
            Ok(())
        }
    }
}
